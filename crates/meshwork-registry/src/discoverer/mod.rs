//! Discoverers: how a registry learns about the rest of the cluster.
//!
//! The [`NetworkDiscoverer`] runs the heartbeat/INFO gossip over a
//! transporter; the [`LocalDiscoverer`] is the degenerate single-node
//! variant that only runs the availability sweeps.

mod local;
mod network;

pub use local::LocalDiscoverer;
pub use network::NetworkDiscoverer;

use async_trait::async_trait;
use meshwork_common::{Result, Target};
use std::time::Duration;

/// Timing knobs for the discovery protocol.
#[derive(Debug, Clone)]
pub struct DiscovererOptions {
    /// How often a HEARTBEAT is broadcast, and how often the availability
    /// sweeps run.
    ///
    /// Default: 5s
    pub heartbeat_interval: Duration,
    /// A remote node whose last heartbeat is older than this is marked
    /// unavailable.
    ///
    /// Default: 30s
    pub heartbeat_timeout: Duration,
    /// An unavailable node is deleted outright after staying offline for
    /// this long.
    ///
    /// Default: 10min
    pub clean_offline_nodes_timeout: Duration,
}

impl Default for DiscovererOptions {
    fn default() -> Self {
        DiscovererOptions {
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(30),
            clean_offline_nodes_timeout: Duration::from_secs(600),
        }
    }
}

/// The discovery driver owned by a broker.
///
/// `start` is idempotent per instance; `stop` announces the departure to
/// the cluster (network variant) and cancels the timers.
#[async_trait]
pub trait Discoverer: Send + Sync {
    async fn start(&self) -> Result<()>;

    async fn stop(&self);

    /// Pushes the local INFO snapshot to `target`. Called by the broker
    /// whenever the local service list changes.
    async fn send_info(&self, target: Target) -> Result<()>;
}
