//! Meshwork
//!
//! A distributed service broker: nodes discover each other over a
//! transporter, exchange service catalogs, and route action calls and
//! events across the cluster with pluggable load balancing and per-endpoint
//! circuit breaking.
//!
//! This facade crate re-exports the three member crates:
//!
//! - [`common`] - protocol packets, errors, [`Context`], serializer and the
//!   transporter abstraction
//! - [`registry`] - node table, action/event catalogs, strategies, circuit
//!   breaker and the discoverer
//! - [`broker`] - the [`ServiceBroker`] itself
//!
//! # Example
//!
//! ```no_run
//! use meshwork::{BrokerOptions, Service, ServiceBroker};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = ServiceBroker::new(BrokerOptions::new("node-1"));
//! broker
//!     .publish_service(Service::new("math").action("add", |ctx| async move {
//!         let a = ctx.params["a"].as_i64().unwrap_or(0);
//!         let b = ctx.params["b"].as_i64().unwrap_or(0);
//!         Ok(json!(a + b))
//!     }))
//!     .await;
//! broker.start().await?;
//! let sum = broker.call("math.add", json!({"a": 40, "b": 2}), Default::default()).await?;
//! assert_eq!(sum, json!(42));
//! # Ok(())
//! # }
//! ```

pub use meshwork_broker as broker;
pub use meshwork_common as common;
pub use meshwork_registry as registry;

pub use meshwork_broker::{BrokerOptions, RetryOptions, Service, ServiceBroker};
pub use meshwork_common::transporter::{ChannelTransporter, Target, Transporter};
pub use meshwork_common::{CallOptions, Context, MeshworkError, Packet, Result, Serializer};
pub use meshwork_registry::discoverer::DiscovererOptions;
pub use meshwork_registry::{
    CircuitBreakerOptions, LifecycleNotification, ListOptions, RegistryOptions, StrategyKind,
};
