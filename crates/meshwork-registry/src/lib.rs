//! Meshwork Service Registry
//!
//! The registry is the distributed heart of Meshwork: the in-memory catalog
//! of nodes, services, actions and events, kept eventually consistent across
//! a changing cluster by the discoverer's heartbeat/INFO exchange.
//!
//! # Components
//!
//! - [`node`] - the node table: liveness, sequence numbers, service lists
//! - [`endpoint`] - routable (node, action|event) pairs and per-entry lists
//! - [`catalog`] - action/event catalogs with wildcard lookup
//! - [`strategy`] - pluggable endpoint selection (round-robin, random,
//!   CPU-usage aware, consistent-hash sharding)
//! - [`breaker`] - per-endpoint circuit breaker state machine
//! - [`registry`] - the [`Registry`] facade tying the above together
//! - [`discoverer`] - how nodes learn about each other (in-process, or
//!   heartbeat/INFO over a transporter)
//!
//! # Consistency model
//!
//! There are no distributed locks. Every node owns its local writes and
//! converges on remote state through INFO packets; two nodes may briefly
//! disagree about a third node's availability. Catalog reads never block on
//! the network: they operate on the current snapshot, and a routed endpoint
//! disconnecting mid-flight is a delivery failure for the caller's retry
//! policy, not a registry bug.

pub mod breaker;
pub mod catalog;
pub mod discoverer;
pub mod endpoint;
pub mod events;
pub mod node;
pub mod options;
pub mod registry;
pub mod strategy;

pub use breaker::{BreakerState, CircuitBreaker};
pub use catalog::{ActionCatalog, EventCatalog};
pub use discoverer::{Discoverer, DiscovererOptions, LocalDiscoverer, NetworkDiscoverer};
pub use endpoint::{ActionEndpoint, ActionHandler, EventEndpoint, EventHandler, LocalService};
pub use events::LifecycleNotification;
pub use node::{Node, NodeCatalog};
pub use options::{CircuitBreakerOptions, ListOptions, RegistryOptions, StrategyKind};
pub use registry::{HeartbeatOutcome, Registry};
pub use strategy::{Candidate, Strategy};
