use super::{Discoverer, DiscovererOptions};
use crate::node::HeartbeatCheck;
use crate::registry::Registry;
use async_trait::async_trait;
use meshwork_common::transporter::Transporter;
use meshwork_common::{DiscoverPayload, DisconnectPayload, Packet, Result, Serializer, Target};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Discoverer running the heartbeat/INFO gossip over a transporter.
///
/// Owns the node's inbound packet stream. Discovery packets (INFO,
/// HEARTBEAT, DISCOVER, DISCONNECT) are applied to the registry here;
/// request/response/event packets are relayed untouched to the broker's
/// transit layer.
pub struct NetworkDiscoverer {
    registry: Arc<Registry>,
    transporter: Arc<dyn Transporter>,
    serializer: Serializer,
    /// Inbound REQ/RES/EVENT packets for the transit layer.
    relay: UnboundedSender<Packet>,
    opts: DiscovererOptions,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl NetworkDiscoverer {
    pub fn new(
        registry: Arc<Registry>,
        transporter: Arc<dyn Transporter>,
        serializer: Serializer,
        relay: UnboundedSender<Packet>,
        opts: DiscovererOptions,
    ) -> Self {
        NetworkDiscoverer {
            registry,
            transporter,
            serializer,
            relay,
            opts,
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    async fn publish(
        transporter: &dyn Transporter,
        serializer: &Serializer,
        from: &str,
        target: Target,
        packet: &Packet,
    ) -> Result<()> {
        let bytes = serializer.serialize(packet)?;
        transporter.publish(from, target, bytes).await
    }

    async fn handle_packet(
        registry: &Registry,
        transporter: &dyn Transporter,
        serializer: &Serializer,
        relay: &UnboundedSender<Packet>,
        packet: Packet,
    ) {
        let node_id = registry.node_id();
        match packet {
            Packet::Info(payload) => {
                registry.process_node_info(payload).await;
            }
            Packet::Heartbeat(payload) => {
                let sender = payload.sender.clone();
                if registry.heartbeat_received(&payload).await == HeartbeatCheck::NeedsDiscovery {
                    debug!(node_id = %sender, "heartbeat from undiscovered node, requesting INFO");
                    let discover = Packet::Discover(DiscoverPayload {
                        sender: node_id.to_string(),
                    });
                    if let Err(err) = Self::publish(
                        transporter,
                        serializer,
                        node_id,
                        Target::Node(sender),
                        &discover,
                    )
                    .await
                    {
                        warn!(error = %err, "failed to send DISCOVER");
                    }
                }
            }
            Packet::Discover(payload) => {
                let info = Packet::Info(registry.local_info().await);
                if let Err(err) = Self::publish(
                    transporter,
                    serializer,
                    node_id,
                    Target::Node(payload.sender),
                    &info,
                )
                .await
                {
                    warn!(error = %err, "failed to answer DISCOVER");
                }
            }
            Packet::Disconnect(payload) => {
                registry.node_disconnected(&payload.sender, false).await;
            }
            other @ (Packet::Request(_) | Packet::Response(_) | Packet::Event(_)) => {
                // Broker gone means shutdown is in progress; drop quietly.
                let _ = relay.send(other);
            }
        }
    }
}

#[async_trait]
impl Discoverer for NetworkDiscoverer {
    async fn start(&self) -> Result<()> {
        let node_id = self.registry.node_id().to_string();
        let mut inbound = self.transporter.connect(&node_id).await?;
        info!(node_id = %node_id, "network discoverer connected");

        let registry = self.registry.clone();
        let transporter = self.transporter.clone();
        let serializer = self.serializer.clone();
        let relay = self.relay.clone();
        let reader = tokio::spawn(async move {
            while let Some(bytes) = inbound.recv().await {
                match serializer.deserialize(&bytes) {
                    Ok(packet) => {
                        Self::handle_packet(
                            &registry,
                            transporter.as_ref(),
                            &serializer,
                            &relay,
                            packet,
                        )
                        .await
                    }
                    Err(err) => warn!(error = %err, "dropping malformed packet"),
                }
            }
        });

        // Announce ourselves and ask who else is out there.
        let discover = Packet::Discover(DiscoverPayload {
            sender: node_id.clone(),
        });
        Self::publish(
            self.transporter.as_ref(),
            &self.serializer,
            &node_id,
            Target::Broadcast,
            &discover,
        )
        .await?;
        self.send_info(Target::Broadcast).await?;

        let registry = self.registry.clone();
        let transporter = self.transporter.clone();
        let serializer = self.serializer.clone();
        let interval = self.opts.heartbeat_interval;
        let from = node_id.clone();
        let beater = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it, INFO just went out.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let heartbeat = Packet::Heartbeat(registry.local_heartbeat().await);
                if let Err(err) = Self::publish(
                    transporter.as_ref(),
                    &serializer,
                    &from,
                    Target::Broadcast,
                    &heartbeat,
                )
                .await
                {
                    warn!(error = %err, "failed to broadcast heartbeat");
                }
            }
        });

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

        let mut tasks = self.tasks.lock().expect("discoverer task list");
        tasks.push(reader);
        tasks.push(beater);
        tasks.push(sweeper);
        Ok(())
    }

    async fn stop(&self) {
        for task in self.tasks.lock().expect("discoverer task list").drain(..) {
            task.abort();
        }
        let node_id = self.registry.node_id().to_string();
        let goodbye = Packet::Disconnect(DisconnectPayload {
            sender: node_id.clone(),
        });
        if let Err(err) = Self::publish(
            self.transporter.as_ref(),
            &self.serializer,
            &node_id,
            Target::Broadcast,
            &goodbye,
        )
        .await
        {
            warn!(error = %err, "failed to announce disconnect");
        }
        self.transporter.disconnect(&node_id).await;
        info!(node_id = %node_id, "network discoverer stopped");
    }

    async fn send_info(&self, target: Target) -> Result<()> {
        let info = Packet::Info(self.registry.local_info().await);
        Self::publish(
            self.transporter.as_ref(),
            &self.serializer,
            self.registry.node_id(),
            target,
            &info,
        )
        .await
    }
}
