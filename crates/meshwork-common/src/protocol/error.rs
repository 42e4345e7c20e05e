use thiserror::Error;

/// Error type shared by every Meshwork crate.
///
/// Routing errors (`ServiceNotFound`, `ServiceNotAvailable`, `RequestSkipped`,
/// `RequestTimeout`, `MaxCallLevel`) come out of the broker's `call` path;
/// the rest are infrastructure failures.
#[derive(Error, Debug)]
pub enum MeshworkError {
    /// No catalog entry exists for the action at all.
    #[error("Service not found: '{action}'")]
    ServiceNotFound { action: String },

    /// A catalog entry exists but every endpoint is unavailable or its
    /// circuit breaker is open.
    #[error("Service not available: '{action}'")]
    ServiceNotAvailable { action: String },

    /// The caller-specified timeout elapsed before a reply arrived. The
    /// remote side is not guaranteed to have stopped executing.
    #[error("Request timeout after {timeout_ms}ms: '{action}'")]
    RequestTimeout { action: String, timeout_ms: u64 },

    /// The circuit breaker short-circuited the call before dispatch.
    #[error("Request skipped by circuit breaker: '{action}' on node '{node_id}'")]
    RequestSkipped { action: String, node_id: String },

    /// Call-chain depth guard tripped; almost always a routing loop.
    #[error("Max call level reached ({level})")]
    MaxCallLevel { level: u32 },

    /// A remote handler returned an error. Carried back verbatim so business
    /// errors surface to the caller unchanged.
    #[error("Remote error from node '{node_id}': {message}")]
    Remote { node_id: String, message: String },

    #[error("Node not found: '{node_id}'")]
    NodeNotFound { node_id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transporter error: {0}")]
    Transport(String),

    #[error("Broker not started")]
    NotStarted,
}

impl MeshworkError {
    /// Checks whether an error is retryable.
    ///
    /// Retryable errors are transient routing failures that may succeed on a
    /// later attempt (another endpoint, a recovered node):
    /// - `ServiceNotAvailable` and `RequestSkipped` are retryable by default
    /// - `RequestTimeout` and `Transport` may succeed against another target
    ///
    /// Everything else (missing services, business errors from remote
    /// handlers, malformed payloads) is permanent.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MeshworkError::ServiceNotAvailable { .. }
                | MeshworkError::RequestSkipped { .. }
                | MeshworkError::RequestTimeout { .. }
                | MeshworkError::Transport(_)
        )
    }

    /// Checks whether a failure should count toward circuit breaker state.
    ///
    /// This is the default for the breaker's `check` predicate: connectivity
    /// and timeout failures count, business errors surfaced from a remote
    /// handler do not.
    pub fn is_countable(&self) -> bool {
        matches!(
            self,
            MeshworkError::RequestTimeout { .. }
                | MeshworkError::Transport(_)
                | MeshworkError::ServiceNotAvailable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MeshworkError>;
