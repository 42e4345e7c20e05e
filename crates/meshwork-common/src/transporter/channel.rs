use super::{Target, Transporter};
use crate::protocol::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use tracing::debug;

/// In-process transporter: a shared hub of tokio channels.
///
/// Every broker in the process connects to the same cloned hub and gets an
/// unbounded mailbox. This is the transporter used by the test suite and by
/// single-process clusters; it stands in for a real network transport while
/// exercising the exact same packet flow.
///
/// # Example
///
/// ```no_run
/// use meshwork_common::transporter::{ChannelTransporter, Target, Transporter};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let hub = ChannelTransporter::new();
/// let mut rx = hub.connect("node-2").await?;
///
/// hub.publish("node-1", Target::Node("node-2".into()), b"hello".to_vec()).await?;
/// assert_eq!(rx.recv().await.unwrap(), b"hello");
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct ChannelTransporter {
    mailboxes: Arc<RwLock<HashMap<String, UnboundedSender<Vec<u8>>>>>,
}

impl ChannelTransporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently connected nodes.
    pub async fn connected_count(&self) -> usize {
        self.mailboxes.read().await.len()
    }
}

#[async_trait]
impl Transporter for ChannelTransporter {
    async fn connect(&self, node_id: &str) -> Result<UnboundedReceiver<Vec<u8>>> {
        let (tx, rx) = unbounded_channel();
        let mut mailboxes = self.mailboxes.write().await;
        mailboxes.insert(node_id.to_string(), tx);
        debug!(node_id, "transporter mailbox registered");
        Ok(rx)
    }

    async fn publish(&self, from: &str, target: Target, data: Vec<u8>) -> Result<()> {
        let mailboxes = self.mailboxes.read().await;
        match target {
            Target::Node(node_id) => {
                if let Some(tx) = mailboxes.get(&node_id) {
                    // A closed mailbox means the node is shutting down;
                    // treated the same as an unknown node.
                    let _ = tx.send(data);
                }
            }
            Target::Broadcast => {
                for (node_id, tx) in mailboxes.iter() {
                    if node_id != from {
                        let _ = tx.send(data.clone());
                    }
                }
            }
        }
        Ok(())
    }

    async fn disconnect(&self, node_id: &str) {
        let mut mailboxes = self.mailboxes.write().await;
        mailboxes.remove(node_id);
        debug!(node_id, "transporter mailbox removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unicast_delivery() {
        let hub = ChannelTransporter::new();
        let mut rx = hub.connect("b").await.unwrap();
        hub.publish("a", Target::Node("b".to_string()), vec![1, 2, 3])
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let hub = ChannelTransporter::new();
        let mut rx_a = hub.connect("a").await.unwrap();
        let mut rx_b = hub.connect("b").await.unwrap();
        let mut rx_c = hub.connect("c").await.unwrap();

        hub.publish("a", Target::Broadcast, vec![9]).await.unwrap();

        assert_eq!(rx_b.recv().await.unwrap(), vec![9]);
        assert_eq!(rx_c.recv().await.unwrap(), vec![9]);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_to_unknown_node_is_silent() {
        let hub = ChannelTransporter::new();
        assert!(hub
            .publish("a", Target::Node("ghost".to_string()), vec![0])
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_removes_mailbox() {
        let hub = ChannelTransporter::new();
        let _rx = hub.connect("a").await.unwrap();
        assert_eq!(hub.connected_count().await, 1);
        hub.disconnect("a").await;
        assert_eq!(hub.connected_count().await, 0);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_mailbox() {
        let hub = ChannelTransporter::new();
        let mut old_rx = hub.connect("a").await.unwrap();
        let mut new_rx = hub.connect("a").await.unwrap();

        hub.publish("b", Target::Node("a".to_string()), vec![7])
            .await
            .unwrap();

        assert_eq!(new_rx.recv().await.unwrap(), vec![7]);
        assert!(old_rx.try_recv().is_err());
    }
}
