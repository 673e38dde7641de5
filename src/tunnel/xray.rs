//! 基于 xray 可执行文件的代理引擎
//! 配置写入临时文件，`xray run -c <file>` 启动，入站端口可连接即视为就绪

use super::{EngineConfig, EngineInstance, ProxyEngine};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use log::debug;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep};

/// 未配置时使用的可执行文件名
pub const DEFAULT_ENGINE_BINARY: &str = "xray";

const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// xray 进程引擎
#[derive(Debug, Clone)]
pub struct XrayEngine {
    binary: PathBuf,
    ready_timeout: Duration,
}

impl XrayEngine {
    pub fn new<P: AsRef<Path>>(binary: P) -> Self {
        Self {
            binary: binary.as_ref().to_path_buf(),
            ready_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl Default for XrayEngine {
    fn default() -> Self {
        Self::new(DEFAULT_ENGINE_BINARY)
    }
}

#[async_trait]
impl ProxyEngine for XrayEngine {
    async fn start(&self, config: &EngineConfig) -> Result<Box<dyn EngineInstance>> {
        let (host, port) = config
            .listen_endpoint()
            .ok_or_else(|| anyhow!("引擎配置缺少入站"))?;

        let mut file = tempfile::Builder::new()
            .prefix("proxyctx-")
            .suffix(".json")
            .tempfile()
            .context("创建引擎配置文件失败")?;
        file.write_all(config.to_json()?.as_bytes())?;
        file.flush()?;

        let mut child = Command::new(&self.binary)
            .arg("run")
            .arg("-c")
            .arg(file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("无法启动引擎 {}", self.binary.display()))?;

        debug!(
            "引擎进程已启动 pid={:?}, 等待 {}:{} 就绪",
            child.id(),
            host,
            port
        );
        wait_ready(&mut child, host, port, self.ready_timeout).await?;

        Ok(Box::new(XrayInstance {
            child: Some(child),
            config_file: Some(file),
        }))
    }
}

/// 轮询入站端口，进程提前退出或超时即失败
async fn wait_ready(child: &mut Child, host: &str, port: u16, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            bail!("引擎进程提前退出: {}", status);
        }
        if TcpStream::connect((host, port)).await.is_ok() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("引擎在 {:?} 内未就绪 ({}:{})", timeout, host, port);
        }
        sleep(READY_POLL_INTERVAL).await;
    }
}

struct XrayInstance {
    child: Option<Child>,
    config_file: Option<NamedTempFile>,
}

#[async_trait]
impl EngineInstance for XrayInstance {
    /// 结束并回收引擎进程，之后再删除配置文件
    async fn close(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            match child.try_wait()? {
                Some(status) => debug!("引擎进程已自行退出: {}", status),
                None => {
                    let pid = child.id();
                    child.kill().await.context("结束引擎进程失败")?;
                    debug!("引擎进程已结束 pid={:?}", pid);
                }
            }
        }
        if let Some(file) = self.config_file.take() {
            file.close().context("删除引擎配置文件失败")?;
        }
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                debug!("结束引擎进程失败: {}", e);
            }
        }
        self.config_file.take();
    }
}
