//! 顶层流程：匹配 -> 测速选择 -> 启动本地入口 -> 运行命令 -> 释放入口

use crate::check::LatencyProber;
use crate::config::Config;
use crate::error::{ProxyCtxError, Result};
use crate::proxy::match_candidates;
use crate::runner;
use crate::select::select_proxy;
use crate::tunnel::{ProxyEngine, TunnelManager};
use crate::ui::progress::ProgressTracker;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;

pub struct App {
    config: Config,
    tunnels: TunnelManager,
    probe_timeout: Option<Duration>,
    progress: ProgressTracker,
}

impl App {
    pub fn new(config: Config, engine: Arc<dyn ProxyEngine>) -> Self {
        let probe_timeout = config.probe_timeout();
        Self {
            config,
            tunnels: TunnelManager::new(engine),
            probe_timeout,
            progress: ProgressTracker::hidden(),
        }
    }

    /// 命令行指定的超时优先于配置文件
    pub fn with_probe_timeout(mut self, timeout: Option<Duration>) -> Self {
        if timeout.is_some() {
            self.probe_timeout = timeout;
        }
        self
    }

    pub fn with_progress(mut self, progress: ProgressTracker) -> Self {
        self.progress = progress;
        self
    }

    /// 运行一次完整流程，返回进程退出码
    ///
    /// 核心流程的错误只记录一行诊断，命令的退出码原样返回。
    pub async fn run(&self, command: &[String]) -> i32 {
        match self.try_run(command).await {
            Ok(code) => code,
            Err(e) => {
                error!("{}", e);
                e.exit_code()
            }
        }
    }

    pub async fn try_run(&self, command: &[String]) -> Result<i32> {
        let target = self.config.benchmark_target();
        let pattern = self.config.choise.as_str();
        info!(
            "开始选择节点 (choise={:?}, benchmark={})",
            if pattern.is_empty() { "*" } else { pattern },
            target
        );

        let candidates = match_candidates(&self.config.proxies, pattern)?;
        let prober = LatencyProber::new(self.tunnels.clone(), target, self.probe_timeout);

        let selected = tokio::select! {
            selected = select_proxy(&candidates, &prober, &self.progress) => selected?,
            _ = tokio::signal::ctrl_c() => {
                self.progress.finish();
                return Err(ProxyCtxError::Interrupted);
            }
        };
        info!(
            "已选择节点: {} ({} {})",
            selected.name,
            selected.proxy_type.to_ascii_lowercase(),
            selected.address()
        );

        let mut tunnel = self
            .tunnels
            .start(selected, self.config.listen.as_deref(), self.config.port)
            .await?;
        info!("本地代理已就绪: {}", tunnel.proxy_url());

        info!("运行命令: {}", command.join(" "));
        let result = runner::run(command, tunnel.proxy_url()).await;
        tunnel.close().await;

        if let Some(e) = result.error {
            error!("{}", e);
        }
        Ok(result.exit_code)
    }
}
