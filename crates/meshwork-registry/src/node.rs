//! The node table: one record per known runtime instance.

use meshwork_common::{HeartbeatPayload, InfoPayload, ServiceInfo};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

/// Result of applying an INFO payload to a [`Node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The payload was stale (`seq` not newer, same instance, node already
    /// available) and was ignored.
    Ignored,
    /// The payload was applied. `reconnected` is true when the node was
    /// previously unavailable or came back with a different instance id.
    Accepted { reconnected: bool },
}

/// One runtime instance, local or remote.
///
/// The local node is created at registry construction; remote nodes appear
/// on their first INFO or HEARTBEAT sighting. A node's `services` list is
/// replaced wholesale on every accepted INFO - it is never patched in place.
#[derive(Debug, Clone)]
pub struct Node {
    /// Cluster-unique id, the primary key.
    pub id: String,
    /// Opaque id that changes on process restart. Used to detect a node
    /// that reconnected with different in-memory state even though its
    /// `seq` went backwards.
    pub instance_id: String,
    /// Exactly one node per registry has this set.
    pub local: bool,
    pub available: bool,
    /// Monotonically increasing state sequence number.
    pub seq: u64,
    /// Most recent CPU usage sample in percent.
    pub cpu: Option<f32>,
    pub last_heartbeat_time: Instant,
    /// Set when the node becomes unavailable; cleared on return.
    pub offline_since: Option<Instant>,
    pub ip_list: Vec<String>,
    pub metadata: Option<Value>,
    pub services: Vec<ServiceInfo>,
}

impl Node {
    /// Creates the registry's own node record.
    pub fn new_local(id: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Node {
            id: id.into(),
            instance_id: instance_id.into(),
            local: true,
            available: true,
            seq: 1,
            cpu: None,
            last_heartbeat_time: Instant::now(),
            offline_since: None,
            ip_list: Vec::new(),
            metadata: None,
            services: Vec::new(),
        }
    }

    /// Creates a remote node record on first sight. It starts unavailable
    /// until its first INFO is applied.
    pub fn new_remote(id: impl Into<String>) -> Self {
        Node {
            id: id.into(),
            instance_id: String::new(),
            local: false,
            available: false,
            seq: 0,
            cpu: None,
            last_heartbeat_time: Instant::now(),
            offline_since: None,
            ip_list: Vec::new(),
            metadata: None,
            services: Vec::new(),
        }
    }

    /// Applies an INFO payload.
    ///
    /// A payload whose `seq` is not newer than the current one is ignored,
    /// unless the instance id changed (process restart) or the node was
    /// previously unavailable. This makes re-delivered INFO packets
    /// idempotent.
    pub fn update(&mut self, info: &InfoPayload) -> UpdateOutcome {
        let instance_changed = !self.instance_id.is_empty() && self.instance_id != info.instance_id;
        if info.seq <= self.seq && !instance_changed && self.available {
            return UpdateOutcome::Ignored;
        }

        let reconnected = !self.available || instance_changed;

        self.instance_id = info.instance_id.clone();
        self.seq = info.seq;
        self.services = info.services.clone();
        self.metadata = info.metadata.clone();
        self.ip_list = info.ip_list.clone();
        self.available = true;
        self.offline_since = None;
        self.last_heartbeat_time = Instant::now();

        UpdateOutcome::Accepted { reconnected }
    }

    /// Refreshes liveness from a heartbeat. Only reached for available
    /// nodes; an unavailable sender goes through discovery and [`update`]
    /// instead, so availability changes stay in one place.
    ///
    /// [`update`]: Node::update
    pub fn heartbeat(&mut self, payload: &HeartbeatPayload) {
        self.last_heartbeat_time = Instant::now();
        self.cpu = payload.cpu;
    }

    /// Marks the node unavailable without forgetting it; it may return.
    ///
    /// Bumps `seq` so that a cached INFO with the old number is not trusted
    /// when the node reappears.
    pub fn disconnected(&mut self, unexpected: bool) {
        if self.available {
            self.available = false;
            self.offline_since = Some(Instant::now());
            self.seq += 1;
            debug!(node_id = %self.id, unexpected, "node marked unavailable");
        }
    }
}

/// Signal returned by [`NodeCatalog::process_heartbeat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatCheck {
    /// The heartbeat matched the cached node state and was applied.
    Applied,
    /// The sender is unknown, or its `seq` drifted from the cached one. The
    /// caller must request a fresh INFO instead of trusting cached services.
    NeedsDiscovery,
}

/// The table of all known nodes, keyed by id.
#[derive(Debug)]
pub struct NodeCatalog {
    nodes: HashMap<String, Node>,
    local_id: String,
    /// Insertion order of node ids, so listings are deterministic.
    order: Vec<String>,
}

impl NodeCatalog {
    pub fn new(local_node: Node) -> Self {
        let local_id = local_node.id.clone();
        let mut nodes = HashMap::new();
        nodes.insert(local_id.clone(), local_node);
        NodeCatalog {
            nodes,
            order: vec![local_id.clone()],
            local_id,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn local(&self) -> &Node {
        &self.nodes[&self.local_id]
    }

    pub fn local_mut(&mut self) -> &mut Node {
        self.nodes.get_mut(&self.local_id).expect("local node always present")
    }

    pub fn get(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn get_mut(&mut self, node_id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Looks up a node, creating a fresh remote record on first sight.
    pub fn get_or_create_remote(&mut self, node_id: &str) -> &mut Node {
        if !self.nodes.contains_key(node_id) {
            self.nodes
                .insert(node_id.to_string(), Node::new_remote(node_id));
            self.order.push(node_id.to_string());
        }
        self.nodes.get_mut(node_id).expect("just inserted")
    }

    /// Applies a heartbeat, or signals that the sender must be
    /// (re-)discovered first.
    pub fn process_heartbeat(&mut self, payload: &HeartbeatPayload) -> HeartbeatCheck {
        match self.nodes.get_mut(&payload.sender) {
            Some(node) if node.seq == payload.seq && node.available => {
                node.heartbeat(payload);
                HeartbeatCheck::Applied
            }
            _ => HeartbeatCheck::NeedsDiscovery,
        }
    }

    /// Marks remote nodes unavailable when their last heartbeat is older
    /// than `timeout`. Returns the ids of nodes that just went offline.
    pub fn check_remote_nodes(&mut self, timeout: std::time::Duration) -> Vec<String> {
        let now = Instant::now();
        let mut expired = Vec::new();
        for node in self.nodes.values_mut() {
            if node.local || !node.available {
                continue;
            }
            if now.duration_since(node.last_heartbeat_time) > timeout {
                node.disconnected(true);
                expired.push(node.id.clone());
            }
        }
        expired
    }

    /// Deletes remote nodes that have been offline for longer than
    /// `timeout`. Returns the removed ids.
    pub fn check_offline_nodes(&mut self, timeout: std::time::Duration) -> Vec<String> {
        let now = Instant::now();
        let mut removed = Vec::new();
        self.nodes.retain(|id, node| {
            if node.local || node.available {
                return true;
            }
            match node.offline_since {
                Some(since) if now.duration_since(since) > timeout => {
                    removed.push(id.clone());
                    false
                }
                _ => true,
            }
        });
        self.order.retain(|id| self.nodes.contains_key(id));
        removed
    }
}
