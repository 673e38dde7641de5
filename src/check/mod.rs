//! 延迟探测
//! 为单个节点临时开一条隧道，经隧道请求一次测速地址并计时

use crate::error::{ProxyCtxError, Result};
use crate::proxy::ProxyDescriptor;
use crate::tunnel::TunnelManager;
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use reqwest::redirect::Policy;
use std::time::{Duration, Instant};
use tokio::time::timeout_at;
use url::Url;

/// 单次探测的默认超时
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(8);

/// 测速接口，选择流程只依赖这个 trait
#[async_trait]
pub trait LatencyTester: Send + Sync {
    async fn test(&self, candidate: &ProxyDescriptor) -> Result<Duration>;
}

/// 通过真实隧道测速
pub struct LatencyProber {
    tunnels: TunnelManager,
    target: String,
    timeout: Duration,
}

impl LatencyProber {
    /// `timeout` 为 `None` 或 0 时使用默认 8 秒
    pub fn new(tunnels: TunnelManager, target: &str, timeout: Option<Duration>) -> Self {
        Self {
            tunnels,
            target: target.to_string(),
            timeout: timeout
                .filter(|t| !t.is_zero())
                .unwrap_or(DEFAULT_PROBE_TIMEOUT),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 探测一个节点
    ///
    /// 隧道启动、请求和读完响应体共用一个超时期限；无论成功、失败还是超时，
    /// 临时隧道都在返回前关闭并等待引擎完全停止。
    pub async fn probe(&self, candidate: &ProxyDescriptor) -> Result<Duration> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.timeout;

        let mut tunnel = match timeout_at(deadline, self.tunnels.start(candidate, None, 0)).await {
            Ok(Ok(tunnel)) => tunnel,
            Ok(Err(e)) => return Err(ProxyCtxError::ProbeFailed(e.to_string())),
            Err(_) => return Err(timed_out()),
        };
        debug!("{} 测速隧道: {}", candidate.name, tunnel.proxy_url());

        let fetch_started = Instant::now();
        let fetched = timeout_at(deadline, fetch_once(tunnel.proxy_url(), &self.target)).await;
        let elapsed = fetch_started.elapsed();
        tunnel.close().await;

        match fetched {
            Ok(result) => {
                result?;
                Ok(non_zero_elapsed(elapsed, started))
            }
            Err(_) => Err(timed_out()),
        }
    }
}

fn timed_out() -> ProxyCtxError {
    ProxyCtxError::ProbeFailed("timeout".to_string())
}

#[async_trait]
impl LatencyTester for LatencyProber {
    async fn test(&self, candidate: &ProxyDescriptor) -> Result<Duration> {
        self.probe(candidate).await
    }
}

/// 计时异常时退回到探测开始以来的时间，且不返回 0
pub(crate) fn non_zero_elapsed(elapsed: Duration, started: Instant) -> Duration {
    if !elapsed.is_zero() {
        return elapsed;
    }
    started.elapsed().max(Duration::from_nanos(1))
}

/// 补全缺省的 scheme，并要求包含主机名
pub(crate) fn normalize_target(target: &str) -> Result<Url> {
    let target = target.trim();
    let url = match Url::parse(target) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("https://{}", target))
            .map_err(|e| ProxyCtxError::ProbeFailed(format!("invalid benchmark url: {}", e)))?,
        Err(e) => {
            return Err(ProxyCtxError::ProbeFailed(format!(
                "invalid benchmark url: {}",
                e
            )));
        }
    };

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(ProxyCtxError::ProbeFailed(
            "benchmark url missing host".to_string(),
        )),
    }
}

/// 只经隧道发起一次 GET，不跟随跳转，读完并丢弃响应体
async fn fetch_once(proxy_url: &str, target: &str) -> Result<()> {
    let url = normalize_target(target)?;
    let client = tunnel_client(proxy_url)?;

    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ProxyCtxError::ProbeFailed(error_chain(&e)))?;
    debug!("测速响应: {}", response.status());

    while response
        .chunk()
        .await
        .map_err(|e| ProxyCtxError::ProbeFailed(error_chain(&e)))?
        .is_some()
    {}
    Ok(())
}

/// 唯一出口是隧道的 HTTP 客户端；socks5h 让域名也交给隧道解析
fn tunnel_client(proxy_url: &str) -> Result<Client> {
    let socks = match proxy_url.strip_prefix("socks5://") {
        Some(rest) => format!("socks5h://{}", rest),
        None => proxy_url.to_string(),
    };
    let proxy =
        reqwest::Proxy::all(&socks).map_err(|e| ProxyCtxError::ProbeFailed(e.to_string()))?;

    Client::builder()
        .no_proxy()
        .proxy(proxy)
        .redirect(Policy::none())
        .user_agent(concat!("proxyctx/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProxyCtxError::ProbeFailed(e.to_string()))
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
