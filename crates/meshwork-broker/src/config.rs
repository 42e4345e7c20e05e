//! Broker configuration.

use meshwork_common::Serializer;
use meshwork_registry::discoverer::DiscovererOptions;
use meshwork_registry::RegistryOptions;
use std::time::Duration;

/// Retry policy for failed calls.
///
/// Only errors classified as retryable (no available endpoint, skipped by a
/// breaker, timeout, transport failure) are retried; business errors raised
/// by remote handlers surface immediately.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Default: false
    pub enabled: bool,
    /// Additional attempts after the first failure.
    ///
    /// Default: 5
    pub retries: u32,
    /// Delay before the first retry.
    ///
    /// Default: 100ms
    pub delay: Duration,
    /// Ceiling for the backed-off delay.
    ///
    /// Default: 1s
    pub max_delay: Duration,
    /// Multiplier applied to the delay after every attempt.
    ///
    /// Default: 2.0
    pub factor: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        RetryOptions {
            enabled: false,
            retries: 5,
            delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            factor: 2.0,
        }
    }
}

impl RetryOptions {
    /// Delay before retry number `attempt` (1-based), exponentially backed
    /// off and capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.factor.powi(attempt.saturating_sub(1) as i32);
        let delay = self.delay.mul_f64(factor);
        delay.min(self.max_delay)
    }
}

/// Top-level broker configuration.
///
/// # Example
///
/// ```
/// use meshwork_broker::BrokerOptions;
///
/// let opts = BrokerOptions::new("node-1");
/// assert_eq!(opts.node_id, "node-1");
/// assert!(opts.internal_services);
/// ```
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    /// Cluster-unique id of this node.
    pub node_id: String,
    /// Default timeout applied to calls without a per-call override.
    ///
    /// Default: 5s
    pub request_timeout: Duration,
    /// Maximum nested call depth before a call fails with a max-call-level
    /// error. Guards against routing loops.
    ///
    /// Default: 100
    pub max_call_level: u32,
    /// Retry policy for failed calls.
    pub retry: RetryOptions,
    /// Whether the `$node` introspection service is registered on start.
    ///
    /// Default: true
    pub internal_services: bool,
    /// Registry configuration (strategy, prefer-local, breaker).
    pub registry: RegistryOptions,
    /// Discovery timing (heartbeat interval/timeout, offline cleanup).
    pub discoverer: DiscovererOptions,
    /// Wire format for transporter packets.
    pub serializer: Serializer,
}

impl BrokerOptions {
    pub fn new(node_id: impl Into<String>) -> Self {
        BrokerOptions {
            node_id: node_id.into(),
            request_timeout: Duration::from_secs(5),
            max_call_level: 100,
            retry: RetryOptions::default(),
            internal_services: true,
            registry: RegistryOptions::default(),
            discoverer: DiscovererOptions::default(),
            serializer: Serializer::new(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_registry(mut self, registry: RegistryOptions) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_discoverer(mut self, discoverer: DiscovererOptions) -> Self {
        self.discoverer = discoverer;
        self
    }

    pub fn without_internal_services(mut self) -> Self {
        self.internal_services = false;
        self
    }
}
