//! 子进程启动
//! 在继承的环境变量上覆盖代理变量，直接继承标准输入输出

use crate::error::ProxyCtxError;
use log::debug;
use std::ffi::OsString;
use std::process::Stdio;
use tokio::process::Command;

/// 子进程会看到的代理变量，大小写两种写法
pub const PROXY_ENV_KEYS: [&str; 6] = [
    "http_proxy",
    "https_proxy",
    "all_proxy",
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "ALL_PROXY",
];

/// 子进程运行结果
#[derive(Debug)]
pub struct ChildProcessResult {
    pub exit_code: i32,
    pub error: Option<ProxyCtxError>,
}

impl ChildProcessResult {
    fn exited(exit_code: i32) -> Self {
        Self {
            exit_code,
            error: None,
        }
    }

    fn failed(error: ProxyCtxError) -> Self {
        Self {
            exit_code: 1,
            error: Some(error),
        }
    }
}

/// 六个代理变量都指向同一个地址
pub fn proxy_env(proxy_url: &str) -> Vec<(OsString, OsString)> {
    PROXY_ENV_KEYS
        .iter()
        .map(|key| (OsString::from(key), OsString::from(proxy_url)))
        .collect()
}

/// 覆盖式合并：与覆盖项同名（区分大小写）的继承变量被丢弃
pub fn merge_env<I>(base: I, overrides: &[(OsString, OsString)]) -> Vec<(OsString, OsString)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut merged: Vec<(OsString, OsString)> = base
        .into_iter()
        .filter(|(key, _)| !overrides.iter().any(|(k, _)| k == key))
        .collect();
    merged.extend(overrides.iter().cloned());
    merged
}

/// 运行命令并等待结束
///
/// - 启动失败：退出码 1，并带上错误
/// - 正常退出：子进程自身的退出码
/// - 被信号终止等拿不到退出码的情况：退出码 1，不带错误
pub async fn run(command: &[String], proxy_url: &str) -> ChildProcessResult {
    let Some((program, args)) = command.split_first() else {
        return ChildProcessResult::failed(ProxyCtxError::Launch("没有要运行的命令".to_string()));
    };

    let env = merge_env(std::env::vars_os(), &proxy_env(proxy_url));

    let spawned = Command::new(program)
        .args(args)
        .env_clear()
        .envs(env)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            return ChildProcessResult::failed(ProxyCtxError::Launch(format!("{}: {}", program, e)));
        }
    };

    match child.wait().await {
        Ok(status) => {
            debug!("子进程结束: {}", status);
            ChildProcessResult::exited(status.code().unwrap_or(1))
        }
        Err(e) => {
            debug!("等待子进程失败: {}", e);
            ChildProcessResult::exited(1)
        }
    }
}
