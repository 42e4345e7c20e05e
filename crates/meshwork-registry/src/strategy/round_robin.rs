use super::{Candidate, Strategy};
use meshwork_common::Context;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Stateful counter cycling the endpoint list in order.
///
/// The counter is reset whenever it would run past the (possibly changed)
/// list length, so a shrinking endpoint set never skips the head of the
/// list.
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    counter: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for RoundRobinStrategy {
    fn select(&self, candidates: &[Candidate<'_>], _ctx: Option<&Context>) -> Option<usize> {
        let len = candidates.len();
        if len == 0 {
            return None;
        }
        let prev = self
            .counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some(if c + 1 >= len { 0 } else { c + 1 })
            })
            .unwrap_or(0);
        // The list may have shrunk since the counter was last bumped.
        Some(if prev >= len { 0 } else { prev })
    }
}
