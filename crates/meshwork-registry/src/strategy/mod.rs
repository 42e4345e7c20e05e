//! Load-balancing strategies.
//!
//! A strategy picks one endpoint out of the currently *available* list for
//! a catalog entry. The contract: return `None` only for an empty list, and
//! never mutate the input. Every catalog entry owns its own strategy
//! instance, so stateful strategies (round-robin counters, shard rings) are
//! scoped per entry.
//!
//! Counters are atomics: selection runs under the registry's read lock and
//! concurrent callers on separate threads are allowed.

mod cpu_usage;
mod random;
mod round_robin;
mod shard;

pub use cpu_usage::{CpuUsageOptions, CpuUsageStrategy};
pub use random::RandomStrategy;
pub use round_robin::RoundRobinStrategy;
pub use shard::{ShardOptions, ShardStrategy};

use crate::options::StrategyKind;
use meshwork_common::Context;
use std::fmt;

/// The per-endpoint facts a strategy may select on.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate<'a> {
    pub node_id: &'a str,
    pub local: bool,
    /// The node's most recent CPU sample, if any.
    pub cpu: Option<f32>,
}

/// Selection algorithm over a list of available endpoints.
pub trait Strategy: Send + Sync + fmt::Debug {
    /// Picks the index of one candidate, or `None` iff the list is empty.
    fn select(&self, candidates: &[Candidate<'_>], ctx: Option<&Context>) -> Option<usize>;
}

/// Builds a fresh strategy instance for a new catalog entry.
pub fn build_strategy(kind: &StrategyKind) -> Box<dyn Strategy> {
    match kind {
        StrategyKind::RoundRobin => Box::new(RoundRobinStrategy::new()),
        StrategyKind::Random => Box::new(RandomStrategy::new()),
        StrategyKind::CpuUsage(opts) => Box::new(CpuUsageStrategy::new(opts.clone())),
        StrategyKind::Shard(opts) => Box::new(ShardStrategy::new(opts.clone())),
    }
}
