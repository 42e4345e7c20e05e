use super::{Discoverer, DiscovererOptions};
use crate::registry::Registry;
use async_trait::async_trait;
use meshwork_common::{Result, Target};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Discoverer for a broker without a transporter.
///
/// There is no cluster to gossip with, so it only runs the availability
/// sweeps; those still matter when remote nodes were injected by other
/// means (tests, static topologies).
pub struct LocalDiscoverer {
    registry: Arc<Registry>,
    opts: DiscovererOptions,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl LocalDiscoverer {
    pub fn new(registry: Arc<Registry>, opts: DiscovererOptions) -> Self {
        LocalDiscoverer {
            registry,
            opts,
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Discoverer for LocalDiscoverer {
    async fn start(&self) -> Result<()> {
        debug!("starting local discoverer");
        let registry = self.registry.clone();
        let opts = self.opts.clone();
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(opts.heartbeat_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                registry.check_remote_nodes(opts.heartbeat_timeout).await;
                registry
                    .check_offline_nodes(opts.clean_offline_nodes_timeout)
                    .await;
            }
        });
        self.tasks.lock().expect("discoverer task list").push(sweeper);
        Ok(())
    }

    async fn stop(&self) {
        for task in self.tasks.lock().expect("discoverer task list").drain(..) {
            task.abort();
        }
    }

    async fn send_info(&self, _target: Target) -> Result<()> {
        Ok(())
    }
}
