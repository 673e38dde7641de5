//! 本地隧道生命周期管理
//! 把选中的节点交给代理引擎，在本地开出 SOCKS 入口，并保证引擎资源只释放一次

pub mod outbound;
pub mod xray;

use crate::error::{ProxyCtxError, Result};
use crate::proxy::ProxyDescriptor;
use async_trait::async_trait;
use log::{debug, warn};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub use outbound::{EngineConfig, build_engine_config, build_outbound};
pub use xray::XrayEngine;

/// 默认监听地址
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1";

/// 代理引擎：接收声明式配置，启动一个实例
#[async_trait]
pub trait ProxyEngine: Send + Sync {
    async fn start(&self, config: &EngineConfig) -> anyhow::Result<Box<dyn EngineInstance>>;
}

/// 正在运行的引擎实例
#[async_trait]
pub trait EngineInstance: Send {
    /// 释放引擎资源，返回时实例已停止且不再占用监听端口
    async fn close(&mut self) -> anyhow::Result<()>;

    /// 无法等待时的同步释放，只发出停止请求
    fn abort(&mut self);
}

/// 一个已启动的本地转发入口
///
/// 句柄独占引擎实例；`close` 等待实例完全停止且可重复调用。
/// 未关闭就被丢弃（例如探测被取消）时由 `Drop` 调用 `abort`。
pub struct TunnelHandle {
    instance: Option<Box<dyn EngineInstance>>,
    listen_addr: String,
    listen_port: u16,
    proxy_url: String,
}

impl TunnelHandle {
    pub fn listen_addr(&self) -> &str {
        &self.listen_addr
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    /// `socks5://addr:port`
    pub fn proxy_url(&self) -> &str {
        &self.proxy_url
    }

    pub fn is_open(&self) -> bool {
        self.instance.is_some()
    }

    /// 释放引擎实例，错误只记录不抛出
    pub async fn close(&mut self) {
        if let Some(mut instance) = self.instance.take() {
            match instance.close().await {
                Ok(()) => debug!("本地代理已关闭: {}", self.proxy_url),
                Err(e) => warn!("关闭本地代理 {} 失败: {:#}", self.proxy_url, e),
            }
        }
    }
}

impl Drop for TunnelHandle {
    fn drop(&mut self) {
        if let Some(mut instance) = self.instance.take() {
            instance.abort();
            debug!("本地代理被丢弃，已请求停止: {}", self.proxy_url);
        }
    }
}

impl std::fmt::Debug for TunnelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelHandle")
            .field("proxy_url", &self.proxy_url)
            .field("open", &self.is_open())
            .finish()
    }
}

/// 隧道管理器
#[derive(Clone)]
pub struct TunnelManager {
    engine: Arc<dyn ProxyEngine>,
}

impl TunnelManager {
    pub fn new(engine: Arc<dyn ProxyEngine>) -> Self {
        Self { engine }
    }

    /// 为节点启动本地 SOCKS 入口
    ///
    /// # 参数
    /// - listen_addr: 监听地址，`None` 时使用回环地址
    /// - listen_port: 监听端口，0 表示自动分配
    ///
    /// 节点先校验再分配端口，无效节点不会占用任何本地资源。
    pub async fn start(
        &self,
        proxy: &ProxyDescriptor,
        listen_addr: Option<&str>,
        listen_port: u16,
    ) -> Result<TunnelHandle> {
        let listen_addr = listen_addr
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .unwrap_or(DEFAULT_LISTEN_ADDR);

        let outbound = build_outbound(proxy)?;

        let listen_port = if listen_port == 0 {
            free_port(listen_addr).await?
        } else {
            listen_port
        };

        let config = EngineConfig::new(outbound, listen_addr, listen_port);
        debug!(
            "启动引擎: {} -> {}:{}",
            proxy.name, listen_addr, listen_port
        );

        let instance = self
            .engine
            .start(&config)
            .await
            .map_err(|e| ProxyCtxError::StartFailed(format!("{:#}", e)))?;

        Ok(TunnelHandle {
            instance: Some(instance),
            listen_addr: listen_addr.to_string(),
            listen_port,
            proxy_url: socks_url(listen_addr, listen_port),
        })
    }
}

/// 临时监听一个端口拿到系统分配的端口号，随即释放
///
/// 释放到重新绑定之间端口可能被其他进程占用。
pub async fn free_port(listen_addr: &str) -> Result<u16> {
    let listener = TcpListener::bind((listen_addr, 0))
        .await
        .map_err(|e| ProxyCtxError::StartFailed(format!("无法分配本地端口 {}: {}", listen_addr, e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| ProxyCtxError::StartFailed(e.to_string()))?
        .port();
    Ok(port)
}

fn socks_url(listen_addr: &str, listen_port: u16) -> String {
    match listen_addr.parse::<IpAddr>() {
        Ok(IpAddr::V6(ip)) => format!("socks5://[{}]:{}", ip, listen_port),
        _ => format!("socks5://{}:{}", listen_addr, listen_port),
    }
}
