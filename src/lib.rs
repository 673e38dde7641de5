//! proxyctx：挑选延迟最低的上游代理，在本地开出 SOCKS 入口，
//! 并把入口地址通过代理环境变量交给要运行的命令。

pub mod app;
pub mod check;
pub mod config;
pub mod error;
pub mod proxy;
pub mod runner;
pub mod select;
pub mod tunnel;
pub mod ui;

pub use app::App;
pub use check::{LatencyProber, LatencyTester};
pub use config::Config;
pub use error::{ProxyCtxError, Result};
pub use proxy::{ProxyDescriptor, ProxyType, match_candidates};
pub use select::select_proxy;
pub use tunnel::{EngineInstance, ProxyEngine, TunnelHandle, TunnelManager};
