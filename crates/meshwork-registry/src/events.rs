//! Lifecycle notifications emitted by the registry and circuit breakers.
//!
//! Observability collaborators (logger, metrics, REPL) consume these through
//! the broker, which re-delivers them as local `$`-prefixed events
//! (`$node.connected`, `$circuit-breaker.opened`, ...).

use tokio::sync::mpsc::UnboundedSender;

/// One registry lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleNotification {
    /// A node was seen for the first time, or came back after a disconnect.
    NodeConnected { node_id: String, reconnected: bool },
    /// A known, available node published a newer INFO.
    NodeUpdated { node_id: String },
    /// A node went away. `unexpected` is true for heartbeat timeouts and
    /// false for graceful DISCONNECT packets.
    NodeDisconnected { node_id: String, unexpected: bool },
    /// The service catalog changed. `local` is true when the change came
    /// from this node's own service list.
    ServicesChanged { local: bool },
    /// A circuit breaker tripped open for one remote endpoint.
    BreakerOpened { node_id: String, action: String },
    /// A breaker's recovery timer elapsed; the next call is a probe.
    BreakerHalfOpened { node_id: String, action: String },
    /// A breaker closed again after a successful probe.
    BreakerClosed { node_id: String, action: String },
}

impl LifecycleNotification {
    /// The local event name this notification is re-broadcast under.
    pub fn event_name(&self) -> &'static str {
        match self {
            LifecycleNotification::NodeConnected { .. } => "$node.connected",
            LifecycleNotification::NodeUpdated { .. } => "$node.updated",
            LifecycleNotification::NodeDisconnected { .. } => "$node.disconnected",
            LifecycleNotification::ServicesChanged { .. } => "$services.changed",
            LifecycleNotification::BreakerOpened { .. } => "$circuit-breaker.opened",
            LifecycleNotification::BreakerHalfOpened { .. } => "$circuit-breaker.half-opened",
            LifecycleNotification::BreakerClosed { .. } => "$circuit-breaker.closed",
        }
    }
}

/// Shared sender half for lifecycle notifications.
///
/// Sends are fire-and-forget: if the consumer side is gone (broker shutting
/// down) notifications are silently dropped.
pub type NotificationSender = UnboundedSender<LifecycleNotification>;

pub(crate) fn notify(sender: &NotificationSender, notification: LifecycleNotification) {
    let _ = sender.send(notification);
}
