//! 代理节点定义
//! 强类型的候选代理描述，以及按名称挑选候选的匹配器

pub mod matcher;

use crate::error::{ProxyCtxError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use matcher::match_candidates;

/// 支持的上游代理协议
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyType {
    Vmess,
    Vless,
}

impl ProxyType {
    /// 解析配置中的 `type` 字段（大小写不敏感）
    pub fn parse(tag: &str) -> Result<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "vmess" => Ok(ProxyType::Vmess),
            "vless" => Ok(ProxyType::Vless),
            "" => Err(ProxyCtxError::InvalidDescriptor(
                "proxy type is required".to_string(),
            )),
            other => Err(ProxyCtxError::UnsupportedType(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyType::Vmess => "vmess",
            ProxyType::Vless => "vless",
        }
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// WebSocket 传输参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketOptions {
    pub path: Option<String>,
    pub headers: BTreeMap<String, String>,
}

/// 一个候选代理节点（clash 风格字段）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProxyDescriptor {
    /// 节点名称，配置内唯一
    pub name: String,
    /// 协议类型（vmess / vless）
    #[serde(rename = "type")]
    pub proxy_type: String,
    pub server: String,
    pub port: u16,
    pub uuid: String,
    pub cipher: Option<String>,
    pub flow: Option<String>,
    pub tls: bool,
    pub skip_cert_verify: bool,
    pub servername: Option<String>,
    pub client_fingerprint: Option<String>,
    /// 传输方式（tcp / ws / grpc ...）
    pub network: Option<String>,
    pub ws_opts: Option<WebSocketOptions>,
    /// TCP Fast Open
    pub tfo: bool,
}

impl ProxyDescriptor {
    pub fn new(name: &str, proxy_type: &str, server: &str, port: u16, uuid: &str) -> Self {
        Self {
            name: name.to_string(),
            proxy_type: proxy_type.to_string(),
            server: server.to_string(),
            port,
            uuid: uuid.to_string(),
            ..Default::default()
        }
    }

    pub fn with_tls(mut self, server_name: Option<&str>) -> Self {
        self.tls = true;
        self.servername = server_name.map(str::to_string);
        self
    }

    pub fn with_ws(mut self, path: &str) -> Self {
        self.ws_opts = Some(WebSocketOptions {
            path: Some(path.to_string()),
            headers: BTreeMap::new(),
        });
        self
    }

    /// 解析后的协议类型
    pub fn kind(&self) -> Result<ProxyType> {
        ProxyType::parse(&self.proxy_type)
    }

    /// server:port
    pub fn address(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }

    /// 校验必填字段，格式错误的节点在进入选择流程前被拒绝
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ProxyCtxError::InvalidDescriptor(
                "proxy name is required".to_string(),
            ));
        }
        if self.proxy_type.trim().is_empty() {
            return Err(ProxyCtxError::InvalidDescriptor(format!(
                "{}: proxy type is required",
                self.name
            )));
        }
        if self.server.trim().is_empty() || self.port == 0 {
            return Err(ProxyCtxError::InvalidDescriptor(format!(
                "{}: proxy server and port are required",
                self.name
            )));
        }
        if self.uuid.trim().is_empty() {
            return Err(ProxyCtxError::InvalidDescriptor(format!(
                "{}: proxy uuid is required",
                self.name
            )));
        }
        Ok(())
    }
}

/// 把空字符串视为未设置
pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
