use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

static CONTEXT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Options accepted by `call`/`mcall`/`emit`.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Per-call timeout in milliseconds. Falls back to the broker's
    /// configured request timeout when unset.
    pub timeout_ms: Option<u64>,
    /// Metadata forwarded to the handler (and across nodes).
    pub meta: Option<Value>,
    /// Pin the call to a specific node instead of load balancing.
    pub node_id: Option<String>,
}

impl CallOptions {
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }
}

/// Per-invocation context handed to action and event handlers.
///
/// A fresh context is created for every dispatch; nested calls made by a
/// handler inherit the parent's `level + 1` so routing loops trip the
/// max-call-level guard instead of recursing forever.
#[derive(Debug, Clone)]
pub struct Context {
    /// Unique id of this invocation on the calling node.
    pub id: u64,
    /// Node the invocation originated from.
    pub node_id: String,
    /// Action or event name being invoked. For wildcard event handlers this
    /// is the concrete emitted name, not the registered pattern.
    pub name: String,
    pub params: Value,
    pub meta: Value,
    /// Call-chain depth, starting at 1 for a top-level call.
    pub level: u32,
    /// Action name of the calling handler, if this is a nested call.
    pub caller: Option<String>,
    /// Effective timeout for this invocation.
    pub timeout_ms: Option<u64>,
    /// Set on event dispatches: the group the handler was selected for.
    pub event_group: Option<String>,
}

impl Context {
    /// Creates a top-level context (level 1).
    pub fn new(node_id: impl Into<String>, name: impl Into<String>, params: Value) -> Self {
        Context {
            id: CONTEXT_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            node_id: node_id.into(),
            name: name.into(),
            params,
            meta: Value::Null,
            level: 1,
            caller: None,
            timeout_ms: None,
            event_group: None,
        }
    }

    /// Derives a child context for a nested call made from inside a handler.
    pub fn child(&self, name: impl Into<String>, params: Value) -> Self {
        Context {
            id: CONTEXT_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            node_id: self.node_id.clone(),
            name: name.into(),
            params,
            meta: self.meta.clone(),
            level: self.level + 1,
            caller: Some(self.name.clone()),
            timeout_ms: self.timeout_ms,
            event_group: None,
        }
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }
}
