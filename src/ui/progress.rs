use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// 测速阶段的进度条（输出到 stderr）
#[derive(Clone)]
pub struct ProgressTracker {
    bar: Option<ProgressBar>,
}

impl ProgressTracker {
    pub fn new(enabled: bool) -> Self {
        if !enabled {
            return Self::hidden();
        }

        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
        let style = ProgressStyle::with_template(
            "{spinner:.green} 测速 [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} {msg}",
        )
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);

        Self { bar: Some(bar) }
    }

    /// 不显示任何内容
    pub fn hidden() -> Self {
        Self { bar: None }
    }

    pub fn start(&self, total: u64) {
        if let Some(pb) = &self.bar {
            pb.set_length(total);
            pb.set_position(0);
        }
    }

    pub fn record(&self, name: &str, success: bool) {
        if let Some(pb) = &self.bar {
            pb.inc(1);
            pb.set_message(format!("{} {}", if success { "✅" } else { "❌" }, name));
        }
    }

    /// 暂时隐藏进度条，避免和日志输出交错
    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        match &self.bar {
            Some(pb) => pb.suspend(f),
            None => f(),
        }
    }

    pub fn finish(&self) {
        if let Some(pb) = &self.bar {
            pb.finish_and_clear();
        }
    }
}
