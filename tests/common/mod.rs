//! 集成测试公用的假引擎与本地 HTTP 服务

#![allow(dead_code)]

use async_trait::async_trait;
use proxyctx::tunnel::{EngineConfig, EngineInstance, ProxyEngine};
use proxyctx::{Config, ProxyDescriptor};
use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};

/// 假引擎收到连接后的行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// 正常的 SOCKS5 CONNECT 转发
    Relay,
    /// 接受连接后不做任何响应
    Stall,
    /// 接受连接后立即断开
    Drop,
    /// 拒绝启动实例
    FailStart,
}

/// 记录实例数量的假引擎，绑定请求的端口并提供最小 SOCKS5 服务
pub struct CountingEngine {
    mode: RelayMode,
    latency: HashMap<String, Duration>,
    open: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    starts: AtomicUsize,
}

impl CountingEngine {
    pub fn new(mode: RelayMode) -> Arc<Self> {
        Self::with_latency(mode, &[])
    }

    /// 按上游服务器地址模拟额外延迟
    pub fn with_latency(mode: RelayMode, latency: &[(&str, u64)]) -> Arc<Self> {
        Arc::new(Self {
            mode,
            latency: latency
                .iter()
                .map(|(server, ms)| (server.to_string(), Duration::from_millis(*ms)))
                .collect(),
            open: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            starts: AtomicUsize::new(0),
        })
    }

    /// 当前未释放的实例数
    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// 同时存在过的最大实例数
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProxyEngine for CountingEngine {
    async fn start(&self, config: &EngineConfig) -> anyhow::Result<Box<dyn EngineInstance>> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.mode == RelayMode::FailStart {
            anyhow::bail!("engine refused to start");
        }

        let (host, port) = config
            .listen_endpoint()
            .ok_or_else(|| anyhow::anyhow!("missing inbound"))?;
        let server = config
            .outbounds
            .first()
            .and_then(|outbound| outbound.settings.vnext.first())
            .map(|entry| entry.address.clone())
            .unwrap_or_default();
        let delay = self.latency.get(&server).copied().unwrap_or_default();

        let listener = TcpListener::bind((host, port)).await?;
        let task = tokio::spawn(serve(listener, self.mode, delay));

        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        Ok(Box::new(CountingInstance {
            open: self.open.clone(),
            task: Some(task),
        }))
    }
}

struct CountingInstance {
    open: Arc<AtomicUsize>,
    task: Option<JoinHandle<()>>,
}

/// 等服务任务真正结束（监听端口和所有连接都已释放）后才计为关闭
async fn release(task: JoinHandle<()>, open: Arc<AtomicUsize>) {
    task.abort();
    let _ = task.await;
    open.fetch_sub(1, Ordering::SeqCst);
}

#[async_trait]
impl EngineInstance for CountingInstance {
    async fn close(&mut self) -> anyhow::Result<()> {
        if let Some(task) = self.task.take() {
            release(task, self.open.clone()).await;
        }
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            tokio::spawn(release(task, self.open.clone()));
        }
    }
}

async fn serve(listener: TcpListener, mode: RelayMode, delay: Duration) {
    // 随服务任务一起丢弃，连接任务也会被中止
    let mut connections = JoinSet::new();
    while let Ok((socket, _)) = listener.accept().await {
        connections.spawn(async move {
            let _ = handle(socket, mode, delay).await;
        });
    }
}

/// 等待通过 `Drop` 释放的实例全部结束
pub async fn wait_released(engine: &CountingEngine) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while engine.open() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn handle(mut socket: TcpStream, mode: RelayMode, delay: Duration) -> std::io::Result<()> {
    match mode {
        RelayMode::Drop => return Ok(()),
        RelayMode::Stall => {
            let mut buf = [0u8; 256];
            while socket.read(&mut buf).await? > 0 {}
            return Ok(());
        }
        RelayMode::Relay | RelayMode::FailStart => {}
    }

    // 握手：VER NMETHODS METHODS...
    let mut head = [0u8; 2];
    socket.read_exact(&mut head).await?;
    let mut methods = vec![0u8; head[1] as usize];
    socket.read_exact(&mut methods).await?;
    socket.write_all(&[0x05, 0x00]).await?;

    // 请求：VER CMD RSV ATYP ADDR PORT
    let mut request = [0u8; 4];
    socket.read_exact(&mut request).await?;
    let host = match request[3] {
        0x01 => {
            let mut addr = [0u8; 4];
            socket.read_exact(&mut addr).await?;
            Ipv4Addr::from(addr).to_string()
        }
        0x03 => {
            let mut len = [0u8; 1];
            socket.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            socket.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).into_owned()
        }
        0x04 => {
            let mut addr = [0u8; 16];
            socket.read_exact(&mut addr).await?;
            Ipv6Addr::from(addr).to_string()
        }
        _ => return Ok(()),
    };
    let mut port = [0u8; 2];
    socket.read_exact(&mut port).await?;
    let port = u16::from_be_bytes(port);
    tokio::time::sleep(delay).await;

    let mut upstream = match TcpStream::connect((host.as_str(), port)).await {
        Ok(stream) => stream,
        Err(_) => {
            socket
                .write_all(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await?;
            return Ok(());
        }
    };
    socket
        .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await?;
    tokio::io::copy_bidirectional(&mut socket, &mut upstream).await?;
    Ok(())
}

/// 本地 HTTP 服务：每个请求等待 `delay` 后返回固定响应
pub struct HttpTarget {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    _task: JoinHandle<()>,
}

impl HttpTarget {
    pub async fn start(response: &'static str, delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        let task = tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let counter = counter.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let mut read = 0;
                    loop {
                        match socket.read(&mut buf[read..]).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => read += n,
                        }
                        if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") || read == buf.len() {
                            break;
                        }
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self {
            addr,
            hits,
            _task: task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

pub const NO_CONTENT: &str = "HTTP/1.1 204 No Content\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

pub const REDIRECT: &str = "HTTP/1.1 302 Found\r\nLocation: /elsewhere\r\nContent-Length: 5\r\nConnection: close\r\n\r\nmoved";

pub fn node(name: &str) -> ProxyDescriptor {
    ProxyDescriptor::new(name, "vmess", &format!("{}.example.com", name), 443, "uuid")
}

pub fn config_with(names: &[&str], pattern: &str) -> Config {
    Config {
        proxies: names.iter().map(|n| node(n)).collect(),
        choise: pattern.to_string(),
        ..Default::default()
    }
}
