//! Routable endpoints: (node, action|event) pairs.
//!
//! Endpoints hold lightweight `(node_id, service, schema)` keys rather than
//! references into the node table; availability is re-derived at dispatch
//! time from the node's state and (for actions) the breaker. This breaks
//! the Node <-> Service <-> Endpoint reference cycle.

use crate::breaker::CircuitBreaker;
use futures::future::BoxFuture;
use meshwork_common::{ActionInfo, Context, EventInfo, Result, ServiceInfo};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// An action implementation: a capability-typed async function.
pub type ActionHandler =
    Arc<dyn Fn(Context) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// An event subscription handler. Events carry no reply channel.
pub type EventHandler = Arc<dyn Fn(Context) -> BoxFuture<'static, ()> + Send + Sync>;

/// A locally registered service: its wire-visible schema plus the handler
/// table backing it.
///
/// Handler composition (mixins, hooks) is an explicit step performed by the
/// caller *before* building a `LocalService`; the registry only ever sees
/// the final composed functions.
#[derive(Clone)]
pub struct LocalService {
    pub info: ServiceInfo,
    pub action_handlers: HashMap<String, ActionHandler>,
    pub event_handlers: HashMap<String, EventHandler>,
}

impl LocalService {
    /// Wraps a schema with an empty handler table. Actions and events
    /// without an attached handler are still advertised to the cluster but
    /// fail locally if invoked.
    pub fn new(info: ServiceInfo) -> Self {
        LocalService {
            info,
            action_handlers: HashMap::new(),
            event_handlers: HashMap::new(),
        }
    }

    pub fn with_action_handler(mut self, name: impl Into<String>, handler: ActionHandler) -> Self {
        self.action_handlers.insert(name.into(), handler);
        self
    }

    pub fn with_event_handler(mut self, name: impl Into<String>, handler: EventHandler) -> Self {
        self.event_handlers.insert(name.into(), handler);
        self
    }
}

impl fmt::Debug for LocalService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalService")
            .field("name", &self.info.full_name())
            .field("actions", &self.action_handlers.len())
            .field("events", &self.event_handlers.len())
            .finish()
    }
}

/// A routable (node, action) pair.
///
/// Clones are cheap: handlers and breakers are shared behind `Arc`.
#[derive(Clone)]
pub struct ActionEndpoint {
    pub node_id: String,
    /// Full name of the owning service.
    pub service: String,
    pub action: ActionInfo,
    /// True when `node_id` is the registry's local node.
    pub local: bool,
    /// Present only for local endpoints.
    pub handler: Option<ActionHandler>,
    /// Local-side failure gate for this endpoint.
    pub breaker: Arc<CircuitBreaker>,
}

impl ActionEndpoint {
    /// Stable identity within a catalog entry.
    pub fn key(&self) -> (&str, &str) {
        (&self.node_id, &self.service)
    }
}

impl fmt::Debug for ActionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionEndpoint")
            .field("node_id", &self.node_id)
            .field("service", &self.service)
            .field("action", &self.action.name)
            .field("local", &self.local)
            .finish()
    }
}

/// A routable (node, event subscription) pair.
#[derive(Clone)]
pub struct EventEndpoint {
    pub node_id: String,
    pub service: String,
    pub event: EventInfo,
    /// Competing-consumer group; defaults to the service name.
    pub group: String,
    pub local: bool,
    pub handler: Option<EventHandler>,
}

impl EventEndpoint {
    pub fn key(&self) -> (&str, &str) {
        (&self.node_id, &self.service)
    }
}

impl fmt::Debug for EventEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEndpoint")
            .field("node_id", &self.node_id)
            .field("service", &self.service)
            .field("event", &self.event.name)
            .field("group", &self.group)
            .field("local", &self.local)
            .finish()
    }
}
