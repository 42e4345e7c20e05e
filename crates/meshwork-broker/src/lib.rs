//! Meshwork Service Broker
//!
//! The broker is the node-level entry point of a Meshwork cluster: it hosts
//! local services, keeps a registry of everything the cluster offers, and
//! routes action calls and events to the best endpoint, transparently
//! crossing nodes through a transporter.
//!
//! # Components
//!
//! - [`broker`] - the [`ServiceBroker`]: start/stop, `call`/`mcall`,
//!   `emit`/`broadcast`/`broadcast_local`
//! - [`service`] - the [`Service`] builder pairing schemas with handlers
//! - [`transit`] - request/response correlation and event delivery over the
//!   transporter
//! - [`config`] - [`BrokerOptions`] and the retry policy
//!
//! # Example
//!
//! ```no_run
//! use meshwork_broker::{BrokerOptions, Service, ServiceBroker};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = ServiceBroker::new(BrokerOptions::new("node-1"));
//! broker
//!     .publish_service(Service::new("greeter").action("hello", |ctx| async move {
//!         Ok(json!(format!("Hello, {}!", ctx.params["name"].as_str().unwrap_or("world"))))
//!     }))
//!     .await;
//! broker.start().await?;
//!
//! let greeting = broker
//!     .call("greeter.hello", json!({"name": "Meshwork"}), Default::default())
//!     .await?;
//! println!("{greeting}");
//! broker.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod config;
pub mod service;
pub mod transit;

pub use broker::ServiceBroker;
pub use config::{BrokerOptions, RetryOptions};
pub use service::Service;
pub use transit::Transit;
