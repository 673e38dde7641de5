//! 错误类型定义

use thiserror::Error;

/// 核心流程统一使用的 Result 别名
pub type Result<T> = std::result::Result<T, ProxyCtxError>;

/// 选择、测速、隧道和子进程各环节可能出现的错误
#[derive(Error, Debug)]
pub enum ProxyCtxError {
    // 候选匹配
    #[error("没有代理匹配 choise: {0:?}")]
    NoMatch(String),

    #[error("无效的匹配模式 {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // 测速与选择
    #[error("测速失败: {0}")]
    ProbeFailed(String),

    #[error("所有候选节点测速均失败")]
    AllFailed,

    // 隧道
    #[error("不支持的代理类型: {0}")]
    UnsupportedType(String),

    #[error("无效的代理定义: {0}")]
    InvalidDescriptor(String),

    #[error("本地代理启动失败: {0}")]
    StartFailed(String),

    // 外围
    #[error("配置错误: {0}")]
    Config(String),

    #[error("命令启动失败: {0}")]
    Launch(String),

    #[error("用户中断")]
    Interrupted,
}

impl ProxyCtxError {
    /// 对应的进程退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            ProxyCtxError::Interrupted => 130,
            _ => 1,
        }
    }
}
