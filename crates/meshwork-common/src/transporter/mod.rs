//! Meshwork Transporter Abstraction
//!
//! The transporter is the only thing the broker knows about the network: a
//! way to publish opaque byte blobs to one peer or to all of them, and a
//! mailbox of inbound blobs. Delivery is assumed at-least-once and possibly
//! reordered; everything above (the registry, the transit layer) is written
//! to tolerate duplicates and stale packets.
//!
//! Real deployments plug in a TCP/NATS/AMQP implementation of
//! [`Transporter`]. This crate ships [`ChannelTransporter`], an in-process
//! hub of tokio channels used by tests and single-process clusters.

mod channel;

pub use channel::ChannelTransporter;

use crate::protocol::Result;
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

/// Addressing for an outbound packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Deliver to every connected node except the sender.
    Broadcast,
    /// Deliver to a single node.
    Node(String),
}

/// Moves serialized packets between nodes.
///
/// Implementations must be cheap to clone or shared behind `Arc`; the
/// broker publishes from several tasks concurrently.
#[async_trait]
pub trait Transporter: Send + Sync {
    /// Registers a node's mailbox and returns its inbound packet stream.
    ///
    /// Reconnecting with the same id replaces the previous mailbox.
    async fn connect(&self, node_id: &str) -> Result<UnboundedReceiver<Vec<u8>>>;

    /// Publishes a serialized packet to the target.
    ///
    /// Broadcasting to an empty cluster is not an error. Publishing to an
    /// unknown node is dropped silently: the node may have just left, and
    /// the caller's timeout handles the lost reply.
    async fn publish(&self, from: &str, target: Target, data: Vec<u8>) -> Result<()>;

    /// Removes a node's mailbox. Packets in flight to it are dropped.
    async fn disconnect(&self, node_id: &str);
}
