use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Schema of one action as it travels in an INFO packet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionInfo {
    /// Fully qualified action name (e.g. `"math.add"`).
    pub name: String,
    /// Free-form parameter schema, opaque to the registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Whether the action should be cached by a caching collaborator.
    #[serde(default)]
    pub cache: bool,
}

impl ActionInfo {
    pub fn new(name: impl Into<String>) -> Self {
        ActionInfo {
            name: name.into(),
            params: None,
            cache: false,
        }
    }
}

/// Schema of one event subscription as it travels in an INFO packet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventInfo {
    /// Event name, possibly containing wildcards (e.g. `"user.*"`).
    pub name: String,
    /// Competing-consumer group. Defaults to the owning service name when
    /// absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl EventInfo {
    pub fn new(name: impl Into<String>) -> Self {
        EventInfo {
            name: name.into(),
            group: None,
        }
    }

    pub fn with_group(name: impl Into<String>, group: impl Into<String>) -> Self {
        EventInfo {
            name: name.into(),
            group: Some(group.into()),
        }
    }
}

/// One service exposed by a node, as exchanged in INFO packets.
///
/// A `ServiceInfo` is owned by exactly one node and replaced wholesale
/// whenever that node publishes a new INFO.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Action name -> schema. BTreeMap keeps the wire form deterministic.
    #[serde(default)]
    pub actions: BTreeMap<String, ActionInfo>,
    /// Event name -> schema.
    #[serde(default)]
    pub events: BTreeMap<String, EventInfo>,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>) -> Self {
        ServiceInfo {
            name: name.into(),
            version: None,
            settings: None,
            metadata: None,
            actions: BTreeMap::new(),
            events: BTreeMap::new(),
        }
    }

    /// Fully qualified service name, `"v{version}.{name}"` when versioned.
    pub fn full_name(&self) -> String {
        match self.version {
            Some(v) => format!("v{}.{}", v, self.name),
            None => self.name.clone(),
        }
    }
}

/// Full catalog snapshot for one node.
///
/// Sent unicast as a response to DISCOVER, or broadcast after a local
/// service change. A receiver ignores it when `seq` is not newer than its
/// cached copy, unless `instance_id` changed (the process restarted with a
/// fresh in-memory state) or the node was previously marked unavailable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InfoPayload {
    pub sender: String,
    /// Opaque id regenerated on every process restart.
    pub instance_id: String,
    /// Monotonically increasing per-node state sequence number.
    pub seq: u64,
    pub services: Vec<ServiceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub ip_list: Vec<String>,
    /// Client/runtime description (type + version), informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<Value>,
}

/// Lightweight liveness signal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatPayload {
    pub sender: String,
    /// The sender's current INFO sequence number. A mismatch with the cached
    /// node triggers re-discovery instead of trusting stale services.
    pub seq: u64,
    /// Most recent CPU usage sample in percent, if the sender measures it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f32>,
    /// Sender-side wall clock millis, informational.
    pub timestamp: u64,
}

/// Request for an INFO packet from one peer (unicast) or all (broadcast).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoverPayload {
    pub sender: String,
}

/// Graceful-shutdown notice, applied immediately on receipt rather than
/// waiting for the heartbeat timeout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisconnectPayload {
    pub sender: String,
}

/// A remote action call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestPayload {
    pub sender: String,
    /// Correlation id, unique per sender.
    pub id: u64,
    pub action: String,
    pub params: Value,
    #[serde(default)]
    pub meta: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Call-chain depth, checked against the max-call-level guard.
    pub level: u32,
}

/// Reply to a [`RequestPayload`], matched by `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponsePayload {
    pub sender: String,
    pub id: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A routed event delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventPayload {
    pub sender: String,
    pub id: u64,
    pub event: String,
    pub data: Value,
    /// For balanced emits: the groups this node should dispatch to. Empty
    /// means all groups the node has handlers in.
    #[serde(default)]
    pub groups: Vec<String>,
    /// True for broadcast deliveries; the receiver then dispatches to every
    /// local handler instead of one per group.
    #[serde(default)]
    pub broadcast: bool,
}

/// One logical packet on the transporter.
///
/// The wire encoding is the [`Serializer`](crate::serializer::Serializer)'s
/// concern; this enum only fixes the payload shapes and the topic names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum Packet {
    #[serde(rename = "INFO")]
    Info(InfoPayload),
    #[serde(rename = "HEARTBEAT")]
    Heartbeat(HeartbeatPayload),
    #[serde(rename = "DISCOVER")]
    Discover(DiscoverPayload),
    #[serde(rename = "DISCONNECT")]
    Disconnect(DisconnectPayload),
    #[serde(rename = "REQ")]
    Request(RequestPayload),
    #[serde(rename = "RES")]
    Response(ResponsePayload),
    #[serde(rename = "EVENT")]
    Event(EventPayload),
}

impl Packet {
    /// Logical topic name of the packet kind.
    pub fn topic(&self) -> &'static str {
        match self {
            Packet::Info(_) => "INFO",
            Packet::Heartbeat(_) => "HEARTBEAT",
            Packet::Discover(_) => "DISCOVER",
            Packet::Disconnect(_) => "DISCONNECT",
            Packet::Request(_) => "REQ",
            Packet::Response(_) => "RES",
            Packet::Event(_) => "EVENT",
        }
    }

    /// Node id of the packet's sender.
    pub fn sender(&self) -> &str {
        match self {
            Packet::Info(p) => &p.sender,
            Packet::Heartbeat(p) => &p.sender,
            Packet::Discover(p) => &p.sender,
            Packet::Disconnect(p) => &p.sender,
            Packet::Request(p) => &p.sender,
            Packet::Response(p) => &p.sender,
            Packet::Event(p) => &p.sender,
        }
    }
}
