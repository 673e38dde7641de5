//! 代理节点 -> 引擎声明式配置（xray JSON 结构）

use crate::error::{ProxyCtxError, Result};
use crate::proxy::{ProxyDescriptor, ProxyType, non_empty};
use serde::Serialize;
use std::collections::BTreeMap;

/// 引擎启动配置：一个本地 SOCKS 入站 + 一个上游出站
#[derive(Debug, Clone, Serialize)]
pub struct EngineConfig {
    pub log: LogSettings,
    pub inbounds: Vec<Inbound>,
    pub outbounds: Vec<Outbound>,
}

impl EngineConfig {
    /// 以已生成的出站组装配置，入站为本地 SOCKS
    pub fn new(outbound: Outbound, listen_addr: &str, listen_port: u16) -> Self {
        Self {
            log: LogSettings::default(),
            inbounds: vec![Inbound {
                listen: listen_addr.to_string(),
                port: listen_port,
                protocol: "socks".to_string(),
                settings: InboundSettings { udp: true },
            }],
            outbounds: vec![outbound],
        }
    }

    /// 本地 SOCKS 监听地址
    pub fn listen_endpoint(&self) -> Option<(&str, u16)> {
        self.inbounds
            .first()
            .map(|inbound| (inbound.listen.as_str(), inbound.port))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogSettings {
    pub loglevel: String,
    pub access: String,
    pub error: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            loglevel: "none".to_string(),
            access: "none".to_string(),
            error: "none".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Inbound {
    pub listen: String,
    pub port: u16,
    pub protocol: String,
    pub settings: InboundSettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct InboundSettings {
    pub udp: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outbound {
    pub protocol: String,
    pub settings: OutboundSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_settings: Option<StreamSettings>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundSettings {
    pub vnext: Vec<ServerEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerEntry {
    pub address: String,
    pub port: u16,
    pub users: Vec<User>,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_settings: Option<TlsSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_settings: Option<WsSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sockopt: Option<SockOpt>,
}

impl StreamSettings {
    fn is_empty(&self) -> bool {
        self.network.is_none()
            && self.security.is_none()
            && self.tls_settings.is_none()
            && self.ws_settings.is_none()
            && self.sockopt.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSettings {
    pub allow_insecure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WsSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SockOpt {
    pub tcp_fast_open: bool,
}

/// 生成完整的引擎配置
pub fn build_engine_config(
    proxy: &ProxyDescriptor,
    listen_addr: &str,
    listen_port: u16,
) -> Result<EngineConfig> {
    let outbound = build_outbound(proxy)?;
    Ok(EngineConfig::new(outbound, listen_addr, listen_port))
}

/// 出站部分；只透传节点里实际出现的 TLS / WebSocket / TFO 选项
pub fn build_outbound(proxy: &ProxyDescriptor) -> Result<Outbound> {
    if proxy.proxy_type.trim().is_empty() {
        return Err(ProxyCtxError::InvalidDescriptor(
            "proxy type is required".to_string(),
        ));
    }
    if proxy.server.trim().is_empty() || proxy.port == 0 {
        return Err(ProxyCtxError::InvalidDescriptor(
            "proxy server and port are required".to_string(),
        ));
    }
    if proxy.uuid.trim().is_empty() {
        return Err(ProxyCtxError::InvalidDescriptor(
            "proxy uuid is required".to_string(),
        ));
    }

    let kind = proxy.kind()?;
    let user = match kind {
        ProxyType::Vmess => User {
            id: proxy.uuid.clone(),
            security: Some(non_empty(&proxy.cipher).unwrap_or("auto").to_string()),
            encryption: None,
            flow: None,
        },
        ProxyType::Vless => User {
            id: proxy.uuid.clone(),
            security: None,
            encryption: Some("none".to_string()),
            flow: non_empty(&proxy.flow).map(str::to_string),
        },
    };

    let settings = OutboundSettings {
        vnext: vec![ServerEntry {
            address: proxy.server.clone(),
            port: proxy.port,
            users: vec![user],
        }],
    };

    let stream = build_stream_settings(proxy);

    Ok(Outbound {
        protocol: kind.as_str().to_string(),
        settings,
        stream_settings: (!stream.is_empty()).then_some(stream),
    })
}

fn build_stream_settings(proxy: &ProxyDescriptor) -> StreamSettings {
    let mut stream = StreamSettings::default();

    let network = match non_empty(&proxy.network) {
        Some(network) => Some(network.to_ascii_lowercase()),
        None if proxy.ws_opts.is_some() => Some("ws".to_string()),
        None => None,
    };

    if proxy.tls {
        stream.security = Some("tls".to_string());
        stream.tls_settings = Some(TlsSettings {
            allow_insecure: proxy.skip_cert_verify,
            server_name: non_empty(&proxy.servername).map(str::to_string),
            fingerprint: non_empty(&proxy.client_fingerprint).map(str::to_string),
        });
    }

    if network.as_deref() == Some("ws") || proxy.ws_opts.is_some() {
        let ws = WsSettings {
            path: proxy
                .ws_opts
                .as_ref()
                .and_then(|opts| non_empty(&opts.path))
                .map(str::to_string),
            headers: proxy
                .ws_opts
                .as_ref()
                .map(|opts| opts.headers.clone())
                .unwrap_or_default(),
        };
        if ws.path.is_some() || !ws.headers.is_empty() {
            stream.ws_settings = Some(ws);
        }
    }

    if proxy.tfo {
        stream.sockopt = Some(SockOpt {
            tcp_fast_open: true,
        });
    }

    stream.network = network;
    stream
}
