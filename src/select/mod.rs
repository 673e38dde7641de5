//! 节点选择
//! 依次测速所有候选，取延迟严格最小者；延迟相同时先测到的优先

use crate::check::{LatencyTester, non_zero_elapsed};
use crate::error::{ProxyCtxError, Result};
use crate::proxy::ProxyDescriptor;
use crate::ui::progress::ProgressTracker;
use log::{info, warn};
use std::time::{Duration, Instant};

/// 单个候选的测速结果
#[derive(Debug, Clone)]
pub struct ProbeResult<'a> {
    pub candidate: &'a ProxyDescriptor,
    pub outcome: std::result::Result<Duration, String>,
}

impl ProbeResult<'_> {
    pub fn latency(&self) -> Option<Duration> {
        self.outcome.as_ref().ok().copied()
    }
}

/// 从候选中选出最快的节点
///
/// 只有一个候选时直接返回，不做测速。候选按给定顺序串行测速，
/// 前一个的临时隧道释放后才开始下一个。
pub async fn select_proxy<'a>(
    candidates: &[&'a ProxyDescriptor],
    tester: &dyn LatencyTester,
    progress: &ProgressTracker,
) -> Result<&'a ProxyDescriptor> {
    if let [only] = candidates {
        return Ok(*only);
    }

    progress.start(candidates.len() as u64);
    let mut results = Vec::with_capacity(candidates.len());
    for &candidate in candidates {
        let result = probe_candidate(candidate, tester).await;
        progress.suspend(|| log_result(&result));
        progress.record(&candidate.name, result.outcome.is_ok());
        results.push(result);
    }
    progress.finish();

    let succeeded = results.iter().filter(|r| r.outcome.is_ok()).count();
    info!("测速完成: {}/{} 个节点可用", succeeded, results.len());

    fastest(&results)
        .map(|result| result.candidate)
        .ok_or(ProxyCtxError::AllFailed)
}

async fn probe_candidate<'a>(
    candidate: &'a ProxyDescriptor,
    tester: &dyn LatencyTester,
) -> ProbeResult<'a> {
    let started = Instant::now();
    let outcome = match tester.test(candidate).await {
        Ok(rtt) => Ok(non_zero_elapsed(rtt, started)),
        Err(ProxyCtxError::ProbeFailed(reason)) => Err(reason),
        Err(e) => Err(e.to_string()),
    };
    ProbeResult { candidate, outcome }
}

fn log_result(result: &ProbeResult<'_>) {
    match &result.outcome {
        Ok(rtt) => info!(
            "测速成功: {} ({}ms)",
            result.candidate.name,
            rtt.as_millis()
        ),
        Err(reason) => warn!("测速失败: {} ({})", result.candidate.name, reason),
    }
}

/// 对测速结果做一次折叠：只有严格更快才替换当前最优
pub fn fastest<'r, 'a>(results: &'r [ProbeResult<'a>]) -> Option<&'r ProbeResult<'a>> {
    results.iter().fold(None, |best, result| {
        let Some(rtt) = result.latency() else {
            return best;
        };
        match best.and_then(ProbeResult::latency) {
            Some(best_rtt) if rtt >= best_rtt => best,
            _ => Some(result),
        }
    })
}
