use crate::strategy::{CpuUsageOptions, ShardOptions};

pub use crate::breaker::CircuitBreakerOptions;

/// Which load-balancing strategy new catalog entries are created with.
#[derive(Debug, Clone, Default)]
pub enum StrategyKind {
    /// Stateful counter cycling the endpoint list in order.
    #[default]
    RoundRobin,
    /// Uniform random pick.
    Random,
    /// Prefer endpoints on nodes with a low CPU sample.
    CpuUsage(CpuUsageOptions),
    /// Consistent-hash ring keyed by a call parameter.
    Shard(ShardOptions),
}

/// Registry configuration.
///
/// # Example
///
/// ```
/// use meshwork_registry::{RegistryOptions, StrategyKind};
///
/// let opts = RegistryOptions {
///     strategy: StrategyKind::Random,
///     ..Default::default()
/// };
/// assert!(opts.prefer_local);
/// ```
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// When any local endpoint exists for a name, route to it instead of
    /// load balancing across the cluster.
    ///
    /// Default: true
    pub prefer_local: bool,
    /// Strategy used by every catalog entry.
    ///
    /// Default: round-robin
    pub strategy: StrategyKind,
    /// Per-endpoint circuit breaker configuration.
    pub breaker: CircuitBreakerOptions,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        RegistryOptions {
            prefer_local: true,
            strategy: StrategyKind::default(),
            breaker: CircuitBreakerOptions::default(),
        }
    }
}

/// Filters for the registry's introspection reads (`list_nodes`,
/// `list_services`, `list_actions`, `list_events`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    /// Only entries hosted by the local node.
    pub only_local: bool,
    /// Only entries with at least one available endpoint.
    pub only_available: bool,
    /// Skip `$`-prefixed internal names.
    pub skip_internal: bool,
    /// Include per-endpoint detail in the result.
    pub with_endpoints: bool,
}

impl ListOptions {
    pub fn local(mut self) -> Self {
        self.only_local = true;
        self
    }

    pub fn available(mut self) -> Self {
        self.only_available = true;
        self
    }

    pub fn without_internal(mut self) -> Self {
        self.skip_internal = true;
        self
    }

    pub fn with_endpoints(mut self) -> Self {
        self.with_endpoints = true;
        self
    }
}
