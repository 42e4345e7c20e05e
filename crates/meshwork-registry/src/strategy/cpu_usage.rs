use super::{Candidate, Strategy};
use meshwork_common::Context;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Configuration for [`CpuUsageStrategy`].
#[derive(Debug, Clone)]
pub struct CpuUsageOptions {
    /// CPU percentage below which a node counts as lightly loaded.
    ///
    /// Default: 10.0
    pub low_cpu_usage: f32,
}

impl Default for CpuUsageOptions {
    fn default() -> Self {
        CpuUsageOptions { low_cpu_usage: 10.0 }
    }
}

/// Prefers endpoints on lightly loaded nodes.
///
/// Candidates whose most recent CPU sample is below `low_cpu_usage` are
/// round-robined; when no candidate is below the threshold (or no samples
/// exist yet) the pick falls back to plain random.
#[derive(Debug)]
pub struct CpuUsageStrategy {
    opts: CpuUsageOptions,
    counter: AtomicUsize,
}

impl CpuUsageStrategy {
    pub fn new(opts: CpuUsageOptions) -> Self {
        CpuUsageStrategy {
            opts,
            counter: AtomicUsize::new(0),
        }
    }
}

impl Strategy for CpuUsageStrategy {
    fn select(&self, candidates: &[Candidate<'_>], _ctx: Option<&Context>) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        let low: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c.cpu, Some(cpu) if cpu < self.opts.low_cpu_usage))
            .map(|(i, _)| i)
            .collect();

        if low.is_empty() {
            return Some(rand::thread_rng().gen_range(0..candidates.len()));
        }

        let pick = self.counter.fetch_add(1, Ordering::Relaxed) % low.len();
        Some(low[pick])
    }
}
