use clap::Parser;
use log::{debug, error, info};
use proxyctx::App;
use proxyctx::config::{self, Config};
use proxyctx::tunnel::XrayEngine;
use proxyctx::ui::progress::ProgressTracker;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// 选出延迟最低的代理节点，并在其本地入口下运行命令
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 配置文件路径（默认 ./.config/proxyctx/config.yaml 或 ~/.config/proxyctx/config.yaml）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 单个节点测速超时（毫秒），覆盖配置文件
    #[arg(long)]
    timeout: Option<u64>,

    /// 不显示测速进度条
    #[arg(long)]
    no_progress: bool,

    /// 详细输出
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// 只输出警告和错误
    #[arg(short, long)]
    quiet: bool,

    /// 要运行的命令及其参数
    #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
    command: Vec<String>,
}

fn init_logger(args: &Args) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if args.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    } else if args.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    }
    builder
        .format(|buf, record| writeln!(buf, "proxyctx [{}] {}", record.level(), record.args()))
        .init();
}

async fn run(args: Args) -> i32 {
    let config_path = match args.config {
        Some(path) => path,
        None => match config::find_default_config() {
            Ok(path) => path,
            Err(e) => {
                error!("{:#}", e);
                return 1;
            }
        },
    };

    let config = match Config::load_from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("加载配置失败 {}: {:#}", config_path.display(), e);
            return 1;
        }
    };
    info!("使用配置: {}", config_path.display());

    let engine = XrayEngine::new(config.engine_binary());
    debug!("代理引擎: {}", engine.binary().display());

    let timeout = args
        .timeout
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis);

    App::new(config, Arc::new(engine))
        .with_probe_timeout(timeout)
        .with_progress(ProgressTracker::new(!args.no_progress))
        .run(&args.command)
        .await
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logger(&args);

    let code = run(args).await;
    std::process::exit(code);
}
