//! The registry: one explicit object tying together the node table, the
//! action/event catalogs and the lifecycle notification stream.
//!
//! Everything mutable lives behind a single `RwLock`, so the three mutation
//! triggers (local API calls, inbound discovery packets, sweep timers)
//! interleave without readers ever observing a half-applied catalog. Reads
//! used by call/emit resolution take the read lock, operate on the current
//! snapshot and return owned clones; the routed endpoint disconnecting a
//! moment later is a delivery failure for the caller's retry policy.

use crate::breaker::CircuitBreaker;
use crate::catalog::{ActionCatalog, EventCatalog};
use crate::endpoint::{ActionEndpoint, EventEndpoint, LocalService};
use crate::events::{notify, LifecycleNotification, NotificationSender};
use crate::node::{HeartbeatCheck, Node, NodeCatalog};
use crate::options::{ListOptions, RegistryOptions};
use meshwork_common::{
    Context, HeartbeatPayload, InfoPayload, MeshworkError, Result, ServiceInfo,
};
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub use crate::node::HeartbeatCheck as HeartbeatOutcome;

struct RegistryInner {
    nodes: NodeCatalog,
    actions: ActionCatalog,
    events: EventCatalog,
    local_services: Vec<LocalService>,
}

/// The distributed service registry of one node.
///
/// Multiple registries (and therefore multiple brokers) can coexist in one
/// process; there is no ambient/singleton state.
pub struct Registry {
    inner: RwLock<RegistryInner>,
    opts: RegistryOptions,
    notifier: NotificationSender,
    node_id: String,
    instance_id: String,
}

impl Registry {
    /// Creates a registry with its local node record and returns the
    /// lifecycle notification stream alongside it.
    pub fn new(
        node_id: impl Into<String>,
        opts: RegistryOptions,
    ) -> (Arc<Self>, UnboundedReceiver<LifecycleNotification>) {
        let node_id = node_id.into();
        let instance_id = format!("{:032x}", rand::thread_rng().gen::<u128>());
        let (tx, rx) = unbounded_channel();

        let local_node = Node::new_local(node_id.clone(), instance_id.clone());
        let registry = Arc::new(Registry {
            inner: RwLock::new(RegistryInner {
                nodes: NodeCatalog::new(local_node),
                actions: ActionCatalog::new(opts.strategy.clone()),
                events: EventCatalog::new(opts.strategy.clone()),
                local_services: Vec::new(),
            }),
            opts,
            notifier: tx,
            node_id,
            instance_id,
        });
        (registry, rx)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.opts
    }

    // ------------------------------------------------------------------
    // Local service registration
    // ------------------------------------------------------------------

    /// Registers a local service: synchronous in effect (the catalogs are
    /// updated before this returns) and infallible.
    ///
    /// Re-registering a service with the same full name replaces it.
    pub async fn register_local_service(&self, service: LocalService) {
        let mut inner = self.inner.write().await;
        let full_name = service.info.full_name();

        inner
            .local_services
            .retain(|s| s.info.full_name() != full_name);
        self.remove_local_service_endpoints(&mut inner, &full_name);

        self.add_local_service_endpoints(&mut inner, &service);
        inner.local_services.push(service);

        Self::refresh_local_node(&mut inner);
        drop(inner);

        info!(service = %full_name, "local service registered");
        notify(
            &self.notifier,
            LifecycleNotification::ServicesChanged { local: true },
        );
    }

    /// Removes a local service and its endpoints.
    pub async fn remove_local_service(&self, full_name: &str) {
        let mut inner = self.inner.write().await;
        let before = inner.local_services.len();
        inner
            .local_services
            .retain(|s| s.info.full_name() != full_name);
        if inner.local_services.len() == before {
            return;
        }
        self.remove_local_service_endpoints(&mut inner, full_name);
        Self::refresh_local_node(&mut inner);
        drop(inner);

        info!(service = %full_name, "local service removed");
        notify(
            &self.notifier,
            LifecycleNotification::ServicesChanged { local: true },
        );
    }

    fn add_local_service_endpoints(&self, inner: &mut RegistryInner, service: &LocalService) {
        let full_name = service.info.full_name();
        for action in service.info.actions.values() {
            let handler = service.action_handlers.get(&action.name).cloned();
            let breaker = CircuitBreaker::new(
                self.node_id.clone(),
                action.name.clone(),
                self.opts.breaker.clone(),
                self.notifier.clone(),
            );
            inner.actions.add(ActionEndpoint {
                node_id: self.node_id.clone(),
                service: full_name.clone(),
                action: action.clone(),
                local: true,
                handler,
                breaker,
            });
        }
        for event in service.info.events.values() {
            let handler = service.event_handlers.get(&event.name).cloned();
            inner.events.add(EventEndpoint {
                node_id: self.node_id.clone(),
                service: full_name.clone(),
                event: event.clone(),
                group: event
                    .group
                    .clone()
                    .unwrap_or_else(|| service.info.name.clone()),
                local: true,
                handler,
            });
        }
    }

    fn remove_local_service_endpoints(&self, inner: &mut RegistryInner, full_name: &str) {
        inner.actions.remove_by_service(&self.node_id, full_name);
        inner.events.remove_by_service(&self.node_id, full_name);
    }

    /// Rebuilds the local node's wire-visible service list and bumps `seq`
    /// so peers pick up the change.
    fn refresh_local_node(inner: &mut RegistryInner) {
        let services: Vec<ServiceInfo> =
            inner.local_services.iter().map(|s| s.info.clone()).collect();
        let local = inner.nodes.local_mut();
        local.services = services;
        local.seq += 1;
    }

    /// Snapshot of the local node as an INFO payload, for the discoverer.
    pub async fn local_info(&self) -> InfoPayload {
        let inner = self.inner.read().await;
        let local = inner.nodes.local();
        InfoPayload {
            sender: local.id.clone(),
            instance_id: self.instance_id.clone(),
            seq: local.seq,
            services: local.services.clone(),
            metadata: local.metadata.clone(),
            ip_list: local.ip_list.clone(),
            client: None,
        }
    }

    /// Stores a CPU sample on the local node, picked up by heartbeats and
    /// the CPU-usage strategy.
    pub async fn set_local_cpu(&self, cpu: f32) {
        let mut inner = self.inner.write().await;
        inner.nodes.local_mut().cpu = Some(cpu);
    }

    /// Builds the local HEARTBEAT payload for the discoverer.
    pub async fn local_heartbeat(&self) -> HeartbeatPayload {
        let inner = self.inner.read().await;
        let local = inner.nodes.local();
        HeartbeatPayload {
            sender: local.id.clone(),
            seq: local.seq,
            cpu: local.cpu,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        }
    }

    pub async fn local_seq(&self) -> u64 {
        self.inner.read().await.nodes.local().seq
    }

    // ------------------------------------------------------------------
    // Remote node lifecycle
    // ------------------------------------------------------------------

    /// Applies a remote node's INFO payload: an idempotent upsert.
    ///
    /// Returns whether anything changed, so the caller can decide whether a
    /// re-broadcast is worthwhile. Malformed payloads are logged and
    /// ignored, preserving the last-known-good catalog.
    pub async fn process_node_info(&self, info: InfoPayload) -> bool {
        if info.sender.is_empty() || info.sender == self.node_id {
            warn!(sender = %info.sender, "ignoring malformed or self-referential INFO");
            return false;
        }

        let mut inner = self.inner.write().await;
        let first_seen = inner.nodes.get(&info.sender).is_none();
        let node = inner.nodes.get_or_create_remote(&info.sender);
        let outcome = node.update(&info);

        let reconnected = match outcome {
            crate::node::UpdateOutcome::Ignored => {
                debug!(sender = %info.sender, seq = info.seq, "stale INFO ignored");
                return false;
            }
            crate::node::UpdateOutcome::Accepted { reconnected } => reconnected,
        };

        self.rebuild_remote_endpoints(&mut inner, &info);
        drop(inner);

        if first_seen || reconnected {
            info!(node_id = %info.sender, reconnected = !first_seen, "node connected");
            notify(
                &self.notifier,
                LifecycleNotification::NodeConnected {
                    node_id: info.sender.clone(),
                    reconnected: !first_seen,
                },
            );
        } else {
            debug!(node_id = %info.sender, seq = info.seq, "node updated");
            notify(
                &self.notifier,
                LifecycleNotification::NodeUpdated {
                    node_id: info.sender.clone(),
                },
            );
        }
        notify(
            &self.notifier,
            LifecycleNotification::ServicesChanged { local: false },
        );
        true
    }

    /// Replaces one node's endpoints from its fresh INFO, preserving the
    /// breaker state of endpoints that survive the diff. Only the breaker
    /// state persists across endpoint recomputation.
    fn rebuild_remote_endpoints(&self, inner: &mut RegistryInner, info: &InfoPayload) {
        // Keyed by (service, action): two services on one node may expose
        // the same action name, and their breakers must not cross over.
        let mut kept_breakers: HashMap<(String, String), Arc<CircuitBreaker>> = HashMap::new();
        for entry in inner.actions.iter() {
            for ep in entry.endpoints() {
                if ep.node_id == info.sender {
                    kept_breakers.insert(
                        (ep.service.clone(), ep.action.name.clone()),
                        ep.breaker.clone(),
                    );
                }
            }
        }

        inner.actions.remove_by_node(&info.sender);
        inner.events.remove_by_node(&info.sender);

        for service in &info.services {
            let full_name = service.full_name();
            for action in service.actions.values() {
                let key = (full_name.clone(), action.name.clone());
                let breaker = kept_breakers.remove(&key).unwrap_or_else(|| {
                    CircuitBreaker::new(
                        info.sender.clone(),
                        action.name.clone(),
                        self.opts.breaker.clone(),
                        self.notifier.clone(),
                    )
                });
                inner.actions.add(ActionEndpoint {
                    node_id: info.sender.clone(),
                    service: full_name.clone(),
                    action: action.clone(),
                    local: false,
                    handler: None,
                    breaker,
                });
            }
            for event in service.events.values() {
                inner.events.add(EventEndpoint {
                    node_id: info.sender.clone(),
                    service: full_name.clone(),
                    event: event.clone(),
                    group: event.group.clone().unwrap_or_else(|| service.name.clone()),
                    local: false,
                    handler: None,
                });
            }
        }
    }

    /// Applies a heartbeat, or signals that the sender must be
    /// (re-)discovered before its cached services can be trusted.
    pub async fn heartbeat_received(&self, payload: &HeartbeatPayload) -> HeartbeatCheck {
        let mut inner = self.inner.write().await;
        inner.nodes.process_heartbeat(payload)
    }

    /// Marks a node unavailable. Its endpoints stay in the catalogs but
    /// drop out of the available view immediately.
    pub async fn node_disconnected(&self, node_id: &str, unexpected: bool) {
        let mut inner = self.inner.write().await;
        let was_available = match inner.nodes.get_mut(node_id) {
            Some(node) if !node.local => {
                let was = node.available;
                node.disconnected(unexpected);
                was
            }
            _ => false,
        };
        drop(inner);

        if was_available {
            info!(node_id, unexpected, "node disconnected");
            notify(
                &self.notifier,
                LifecycleNotification::NodeDisconnected {
                    node_id: node_id.to_string(),
                    unexpected,
                },
            );
            notify(
                &self.notifier,
                LifecycleNotification::ServicesChanged { local: false },
            );
        }
    }

    /// Heartbeat-timeout sweep: marks remote nodes unavailable when their
    /// last heartbeat is older than `timeout`.
    pub async fn check_remote_nodes(&self, timeout: std::time::Duration) {
        let expired = {
            let mut inner = self.inner.write().await;
            inner.nodes.check_remote_nodes(timeout)
        };
        for node_id in expired {
            warn!(node_id = %node_id, "heartbeat timeout, marking node unavailable");
            notify(
                &self.notifier,
                LifecycleNotification::NodeDisconnected {
                    node_id,
                    unexpected: true,
                },
            );
        }
    }

    /// Offline-cleanup sweep: deletes nodes that stayed unavailable longer
    /// than `timeout`, together with their catalog entries.
    pub async fn check_offline_nodes(&self, timeout: std::time::Duration) {
        let removed = {
            let mut inner = self.inner.write().await;
            let removed = inner.nodes.check_offline_nodes(timeout);
            for node_id in &removed {
                inner.actions.remove_by_node(node_id);
                inner.events.remove_by_node(node_id);
            }
            removed
        };
        for node_id in removed {
            info!(node_id = %node_id, "offline node removed");
            notify(
                &self.notifier,
                LifecycleNotification::ServicesChanged { local: false },
            );
        }
    }

    // ------------------------------------------------------------------
    // Call/event resolution
    // ------------------------------------------------------------------

    /// Resolves an action call to one endpoint via the entry's strategy.
    pub async fn resolve_action(
        &self,
        action: &str,
        ctx: Option<&Context>,
        pinned_node: Option<&str>,
    ) -> Result<ActionEndpoint> {
        let inner = self.inner.read().await;
        let entry = inner
            .actions
            .get(action)
            .ok_or_else(|| MeshworkError::ServiceNotFound {
                action: action.to_string(),
            })?;

        if let Some(node_id) = pinned_node {
            let ep = entry
                .get_by_node(node_id)
                .ok_or_else(|| MeshworkError::ServiceNotAvailable {
                    action: action.to_string(),
                })?;
            let available = inner
                .nodes
                .get(node_id)
                .map(|n| n.available)
                .unwrap_or(false)
                && ep.breaker.is_available();
            if !available {
                return Err(MeshworkError::ServiceNotAvailable {
                    action: action.to_string(),
                });
            }
            return Ok(ep.clone());
        }

        entry
            .select(&inner.nodes, ctx, self.opts.prefer_local)
            .ok_or_else(|| MeshworkError::ServiceNotAvailable {
                action: action.to_string(),
            })
    }

    /// Balanced event resolution: one endpoint per matching group.
    pub async fn balanced_event_endpoints(
        &self,
        event: &str,
        groups: Option<&[String]>,
        ctx: Option<&Context>,
    ) -> Vec<EventEndpoint> {
        let inner = self.inner.read().await;
        inner
            .events
            .balanced(event, groups, &inner.nodes, ctx, self.opts.prefer_local)
    }

    /// Broadcast resolution: every available matching endpoint.
    pub async fn broadcast_event_endpoints(
        &self,
        event: &str,
        groups: Option<&[String]>,
    ) -> Vec<EventEndpoint> {
        let inner = self.inner.read().await;
        inner.events.all(event, groups, &inner.nodes)
    }

    /// Local-only resolution for `broadcast_local` and for dispatching
    /// inbound broadcast packets.
    pub async fn local_event_endpoints(&self, event: &str) -> Vec<EventEndpoint> {
        let inner = self.inner.read().await;
        inner.events.local(event, &inner.nodes)
    }

    /// Local balanced resolution for inbound balanced EVENT packets: the
    /// sender already picked this node for the given groups; pick one local
    /// handler per matching group.
    pub async fn local_balanced_event_endpoints(
        &self,
        event: &str,
        groups: Option<&[String]>,
    ) -> Vec<EventEndpoint> {
        let inner = self.inner.read().await;
        inner.events.balanced_local(event, groups, &inner.nodes)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub async fn list_nodes(&self, opts: ListOptions) -> Vec<NodeListItem> {
        let inner = self.inner.read().await;
        inner
            .nodes
            .iter()
            .filter(|n| !opts.only_local || n.local)
            .filter(|n| !opts.only_available || n.available)
            .map(|n| NodeListItem {
                id: n.id.clone(),
                local: n.local,
                available: n.available,
                seq: n.seq,
                cpu: n.cpu,
                services: n.services.len(),
            })
            .collect()
    }

    pub async fn list_services(&self, opts: ListOptions) -> Vec<ServiceListItem> {
        let inner = self.inner.read().await;
        let mut items = Vec::new();
        for node in inner.nodes.iter() {
            if opts.only_local && !node.local {
                continue;
            }
            if opts.only_available && !node.available {
                continue;
            }
            for service in &node.services {
                if opts.skip_internal && service.name.starts_with('$') {
                    continue;
                }
                items.push(ServiceListItem {
                    name: service.name.clone(),
                    full_name: service.full_name(),
                    version: service.version,
                    node_id: node.id.clone(),
                    available: node.available,
                    actions: service.actions.keys().cloned().collect(),
                    events: service.events.keys().cloned().collect(),
                });
            }
        }
        items
    }

    pub async fn list_actions(&self, opts: ListOptions) -> Vec<ActionListItem> {
        let inner = self.inner.read().await;
        inner
            .actions
            .iter()
            .filter(|entry| !opts.skip_internal || !entry.name().starts_with('$'))
            .filter(|entry| {
                !opts.only_local || entry.endpoints().iter().any(|ep| ep.local)
            })
            .filter(|entry| !opts.only_available || entry.has_available(&inner.nodes))
            .map(|entry| ActionListItem {
                name: entry.name().to_string(),
                endpoint_count: entry.endpoints().len(),
                available_count: entry.available(&inner.nodes).len(),
                has_local: entry.endpoints().iter().any(|ep| ep.local),
                endpoints: opts.with_endpoints.then(|| {
                    entry
                        .endpoints()
                        .iter()
                        .map(|ep| EndpointListItem {
                            node_id: ep.node_id.clone(),
                            service: ep.service.clone(),
                            local: ep.local,
                            available: inner
                                .nodes
                                .get(&ep.node_id)
                                .map(|n| n.available)
                                .unwrap_or(false)
                                && ep.breaker.is_available(),
                        })
                        .collect()
                }),
            })
            .collect()
    }

    pub async fn list_events(&self, opts: ListOptions) -> Vec<EventListItem> {
        let inner = self.inner.read().await;
        inner
            .events
            .iter()
            .filter(|entry| !opts.skip_internal || !entry.name().starts_with('$'))
            .filter(|entry| {
                !opts.only_local || entry.endpoints().iter().any(|ep| ep.local)
            })
            .filter(|entry| {
                !opts.only_available
                    || entry.endpoints().iter().any(|ep| {
                        inner.nodes.get(&ep.node_id).map(|n| n.available).unwrap_or(false)
                    })
            })
            .map(|entry| EventListItem {
                name: entry.name().to_string(),
                group: entry.group().to_string(),
                endpoint_count: entry.endpoints().len(),
                has_local: entry.endpoints().iter().any(|ep| ep.local),
                endpoints: opts.with_endpoints.then(|| {
                    entry
                        .endpoints()
                        .iter()
                        .map(|ep| EndpointListItem {
                            node_id: ep.node_id.clone(),
                            service: ep.service.clone(),
                            local: ep.local,
                            available: inner
                                .nodes
                                .get(&ep.node_id)
                                .map(|n| n.available)
                                .unwrap_or(false),
                        })
                        .collect()
                }),
            })
            .collect()
    }
}

/// Introspection row for one node.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NodeListItem {
    pub id: String,
    pub local: bool,
    pub available: bool,
    pub seq: u64,
    pub cpu: Option<f32>,
    pub services: usize,
}

/// Introspection row for one service on one node.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ServiceListItem {
    pub name: String,
    pub full_name: String,
    pub version: Option<u32>,
    pub node_id: String,
    pub available: bool,
    pub actions: Vec<String>,
    pub events: Vec<String>,
}

/// Introspection row for one action catalog entry.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActionListItem {
    pub name: String,
    pub endpoint_count: usize,
    pub available_count: usize,
    pub has_local: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<Vec<EndpointListItem>>,
}

/// Introspection row for one event catalog entry.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EventListItem {
    pub name: String,
    pub group: String,
    pub endpoint_count: usize,
    pub has_local: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<Vec<EndpointListItem>>,
}

/// Per-endpoint detail in introspection rows.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EndpointListItem {
    pub node_id: String,
    pub service: String,
    pub local: bool,
    pub available: bool,
}
