//! Transit layer: request/response correlation and event delivery over the
//! transporter.
//!
//! The discoverer owns the inbound byte stream and relays REQ/RES/EVENT
//! packets here. Outbound, the transit serializes payloads and tracks
//! pending requests by correlation id; a reply that never arrives is
//! resolved by the per-call timeout, not by the transport.

use meshwork_common::transporter::Transporter;
use meshwork_common::{
    Context, EventPayload, MeshworkError, Packet, RequestPayload, ResponsePayload, Result,
    Serializer, Target,
};
use meshwork_registry::Registry;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub struct Transit {
    node_id: String,
    serializer: Serializer,
    transporter: Arc<dyn Transporter>,
    registry: Arc<Registry>,
    pending: Mutex<HashMap<u64, oneshot::Sender<ResponsePayload>>>,
    counter: AtomicU64,
}

impl Transit {
    pub fn new(
        registry: Arc<Registry>,
        transporter: Arc<dyn Transporter>,
        serializer: Serializer,
    ) -> Arc<Self> {
        Arc::new(Transit {
            node_id: registry.node_id().to_string(),
            serializer,
            transporter,
            registry,
            pending: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(1),
        })
    }

    pub fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    async fn publish(&self, target: Target, packet: &Packet) -> Result<()> {
        let bytes = self.serializer.serialize(packet)?;
        self.transporter.publish(&self.node_id, target, bytes).await
    }

    /// Sends a request to a remote endpoint and awaits the correlated
    /// response. A missing reply resolves to a timeout error after
    /// `timeout`.
    pub async fn request(
        &self,
        node_id: &str,
        ctx: &Context,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("pending map").insert(id, tx);

        let packet = Packet::Request(RequestPayload {
            sender: self.node_id.clone(),
            id,
            action: ctx.name.clone(),
            params: ctx.params.clone(),
            meta: ctx.meta.clone(),
            timeout_ms: ctx.timeout_ms,
            level: ctx.level,
        });
        if let Err(err) = self.publish(Target::Node(node_id.to_string()), &packet).await {
            self.pending.lock().expect("pending map").remove(&id);
            return Err(err);
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            // Sender dropped: transit shutting down.
            Ok(Err(_)) => {
                return Err(MeshworkError::Transport(
                    "response channel closed".to_string(),
                ))
            }
            Err(_) => {
                self.pending.lock().expect("pending map").remove(&id);
                return Err(MeshworkError::RequestTimeout {
                    action: ctx.name.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        if response.success {
            Ok(response.data.unwrap_or(Value::Null))
        } else {
            Err(MeshworkError::Remote {
                node_id: response.sender,
                message: response
                    .error
                    .unwrap_or_else(|| "unknown remote error".to_string()),
            })
        }
    }

    /// Publishes one EVENT packet to a remote node.
    pub async fn send_event(&self, node_id: &str, payload: EventPayload) -> Result<()> {
        self.publish(Target::Node(node_id.to_string()), &Packet::Event(payload))
            .await
    }

    /// Handles one inbound REQ/RES/EVENT packet relayed by the discoverer.
    pub async fn handle_packet(self: &Arc<Self>, packet: Packet) {
        match packet {
            Packet::Request(request) => {
                let transit = self.clone();
                // Handlers may be slow; never block the inbound pump on them.
                tokio::spawn(async move {
                    transit.handle_request(request).await;
                });
            }
            Packet::Response(response) => {
                let waiter = self.pending.lock().expect("pending map").remove(&response.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => {
                        // Late reply after the caller timed out.
                        debug!(id = response.id, "dropping unmatched response");
                    }
                }
            }
            Packet::Event(event) => self.handle_event(event).await,
            other => warn!(topic = other.topic(), "unexpected packet in transit"),
        }
    }

    async fn handle_request(self: &Arc<Self>, request: RequestPayload) {
        let result = self.invoke_local(&request).await;
        let response = match result {
            Ok(data) => ResponsePayload {
                sender: self.node_id.clone(),
                id: request.id,
                success: true,
                data: Some(data),
                error: None,
            },
            Err(err) => ResponsePayload {
                sender: self.node_id.clone(),
                id: request.id,
                success: false,
                data: None,
                error: Some(err.to_string()),
            },
        };
        if let Err(err) = self
            .publish(
                Target::Node(request.sender.clone()),
                &Packet::Response(response),
            )
            .await
        {
            warn!(error = %err, id = request.id, "failed to send response");
        }
    }

    async fn invoke_local(&self, request: &RequestPayload) -> Result<Value> {
        let endpoint = self
            .registry
            .resolve_action(&request.action, None, Some(&self.node_id))
            .await?;
        let handler = endpoint
            .handler
            .clone()
            .ok_or_else(|| MeshworkError::ServiceNotAvailable {
                action: request.action.clone(),
            })?;

        let mut ctx = Context::new(request.sender.clone(), request.action.clone(), request.params.clone())
            .with_meta(request.meta.clone())
            .with_level(request.level);
        ctx.timeout_ms = request.timeout_ms;
        handler(ctx).await
    }

    /// Dispatches an inbound event to local subscribers.
    ///
    /// Broadcast deliveries hit every local handler (optionally filtered by
    /// groups); balanced deliveries pick one local handler per group, since
    /// the sender already routed the event to this node.
    async fn handle_event(&self, event: EventPayload) {
        let groups = if event.groups.is_empty() {
            None
        } else {
            Some(event.groups.as_slice())
        };
        let endpoints = if event.broadcast {
            let mut all = self.registry.local_event_endpoints(&event.event).await;
            if let Some(gs) = groups {
                all.retain(|ep| gs.iter().any(|g| g == &ep.group));
            }
            all
        } else {
            self.registry
                .local_balanced_event_endpoints(&event.event, groups)
                .await
        };

        for endpoint in endpoints {
            let Some(handler) = endpoint.handler.clone() else {
                continue;
            };
            let mut ctx = Context::new(event.sender.clone(), event.event.clone(), event.data.clone());
            ctx.event_group = Some(endpoint.group.clone());
            tokio::spawn(async move {
                handler(ctx).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshwork_common::transporter::ChannelTransporter;
    use meshwork_registry::{LocalService, RegistryOptions};
    use meshwork_common::{ActionInfo, ServiceInfo};
    use serde_json::json;

    async fn transit_for(node_id: &str, hub: Arc<ChannelTransporter>) -> (Arc<Registry>, Arc<Transit>) {
        let (registry, _rx) = Registry::new(node_id, RegistryOptions::default());
        let transit = Transit::new(registry.clone(), hub, Serializer::new());
        (registry, transit)
    }

    fn adder_service() -> LocalService {
        let mut info = ServiceInfo::new("math");
        info.actions
            .insert("math.add".to_string(), ActionInfo::new("math.add"));
        LocalService::new(info).with_action_handler(
            "math.add",
            Arc::new(|ctx: Context| {
                Box::pin(async move {
                    let a = ctx.params["a"].as_i64().unwrap_or(0);
                    let b = ctx.params["b"].as_i64().unwrap_or(0);
                    Ok(json!(a + b))
                })
            }),
        )
    }

    /// Wires a raw inbound pump the way the broker does via the discoverer.
    fn pump(transit: Arc<Transit>, mut inbound: tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>) {
        tokio::spawn(async move {
            let serializer = Serializer::new();
            while let Some(bytes) = inbound.recv().await {
                if let Ok(packet) = serializer.deserialize(&bytes) {
                    transit.handle_packet(packet).await;
                }
            }
        });
    }

    #[tokio::test]
    async fn test_request_response_roundtrip() {
        let hub = Arc::new(ChannelTransporter::new());
        let (_reg1, transit1) = transit_for("node-1", hub.clone()).await;
        let (reg2, transit2) = transit_for("node-2", hub.clone()).await;
        reg2.register_local_service(adder_service()).await;

        pump(transit1.clone(), hub.connect("node-1").await.unwrap());
        pump(transit2.clone(), hub.connect("node-2").await.unwrap());

        let ctx = Context::new("node-1", "math.add", json!({"a": 2, "b": 3}));
        let result = transit1
            .request("node-2", &ctx, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result, json!(5));
    }

    #[tokio::test]
    async fn test_remote_handler_error_surfaces() {
        let hub = Arc::new(ChannelTransporter::new());
        let (_reg1, transit1) = transit_for("node-1", hub.clone()).await;
        let (reg2, transit2) = transit_for("node-2", hub.clone()).await;

        let mut info = ServiceInfo::new("math");
        info.actions
            .insert("math.fail".to_string(), ActionInfo::new("math.fail"));
        let service = LocalService::new(info).with_action_handler(
            "math.fail",
            Arc::new(|_ctx: Context| {
                Box::pin(async move {
                    Err(MeshworkError::Transport("boom".to_string()))
                })
            }),
        );
        reg2.register_local_service(service).await;

        pump(transit1.clone(), hub.connect("node-1").await.unwrap());
        pump(transit2.clone(), hub.connect("node-2").await.unwrap());

        let ctx = Context::new("node-1", "math.fail", json!({}));
        let err = transit1
            .request("node-2", &ctx, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, MeshworkError::Remote { ref node_id, .. } if node_id == "node-2"));
    }

    #[tokio::test]
    async fn test_request_to_silent_node_times_out() {
        let hub = Arc::new(ChannelTransporter::new());
        let (_reg1, transit1) = transit_for("node-1", hub.clone()).await;
        // node-2 has a mailbox but nothing pumping it.
        let _mailbox = hub.connect("node-2").await.unwrap();

        let ctx = Context::new("node-1", "math.add", json!({}));
        let err = transit1
            .request("node-2", &ctx, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, MeshworkError::RequestTimeout { .. }));
        // The pending slot must be cleaned up.
        assert!(transit1.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_action_request_gets_error_response() {
        let hub = Arc::new(ChannelTransporter::new());
        let (_reg1, transit1) = transit_for("node-1", hub.clone()).await;
        let (_reg2, transit2) = transit_for("node-2", hub.clone()).await;

        pump(transit1.clone(), hub.connect("node-1").await.unwrap());
        pump(transit2.clone(), hub.connect("node-2").await.unwrap());

        let ctx = Context::new("node-1", "ghost.action", json!({}));
        let err = transit1
            .request("node-2", &ctx, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, MeshworkError::Remote { .. }));
    }

    #[tokio::test]
    async fn test_late_response_is_dropped() {
        let hub = Arc::new(ChannelTransporter::new());
        let (_reg1, transit1) = transit_for("node-1", hub.clone()).await;

        // A response nobody is waiting for must not panic or leak.
        transit1
            .handle_packet(Packet::Response(ResponsePayload {
                sender: "node-2".to_string(),
                id: 999,
                success: true,
                data: Some(json!(1)),
                error: None,
            }))
            .await;
        assert!(transit1.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inbound_broadcast_event_hits_all_local_handlers() {
        let hub = Arc::new(ChannelTransporter::new());
        let (registry, transit) = transit_for("node-1", hub.clone()).await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        for name in ["mail", "push"] {
            let mut info = ServiceInfo::new(name);
            info.events.insert(
                "user.created".to_string(),
                meshwork_common::EventInfo::new("user.created"),
            );
            let tx = tx.clone();
            let service = LocalService::new(info).with_event_handler(
                "user.created",
                Arc::new(move |ctx: Context| {
                    let tx = tx.clone();
                    Box::pin(async move {
                        let _ = tx.send(ctx.event_group.unwrap_or_default());
                    })
                }),
            );
            registry.register_local_service(service).await;
        }

        transit
            .handle_packet(Packet::Event(EventPayload {
                sender: "node-2".to_string(),
                id: 1,
                event: "user.created".to_string(),
                data: json!({"id": 7}),
                groups: Vec::new(),
                broadcast: true,
            }))
            .await;

        let mut groups = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        groups.sort();
        assert_eq!(groups, vec!["mail", "push"]);
    }

    #[tokio::test]
    async fn test_inbound_balanced_event_respects_group_filter() {
        let hub = Arc::new(ChannelTransporter::new());
        let (registry, transit) = transit_for("node-1", hub.clone()).await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        for name in ["mail", "push"] {
            let mut info = ServiceInfo::new(name);
            info.events.insert(
                "user.created".to_string(),
                meshwork_common::EventInfo::new("user.created"),
            );
            let tx = tx.clone();
            let service = LocalService::new(info).with_event_handler(
                "user.created",
                Arc::new(move |ctx: Context| {
                    let tx = tx.clone();
                    Box::pin(async move {
                        let _ = tx.send(ctx.event_group.unwrap_or_default());
                    })
                }),
            );
            registry.register_local_service(service).await;
        }

        transit
            .handle_packet(Packet::Event(EventPayload {
                sender: "node-2".to_string(),
                id: 2,
                event: "user.created".to_string(),
                data: json!({}),
                groups: vec!["mail".to_string()],
                broadcast: false,
            }))
            .await;

        assert_eq!(rx.recv().await.unwrap(), "mail");
        assert!(rx.try_recv().is_err());
    }
}
