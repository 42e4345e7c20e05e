//! The service broker: the node-level entry point tying registry,
//! discoverer and transit together.

use crate::config::BrokerOptions;
use crate::service::Service;
use crate::transit::Transit;
use meshwork_common::transporter::Transporter;
use meshwork_common::{
    CallOptions, Context, EventPayload, MeshworkError, Packet, Result, Target,
};
use meshwork_registry::discoverer::{Discoverer, LocalDiscoverer, NetworkDiscoverer};
use meshwork_registry::{LifecycleNotification, Registry};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One Meshwork node.
///
/// A broker hosts local services, discovers the rest of the cluster through
/// its discoverer, and routes calls and events to the best endpoint, local
/// or remote. Several brokers can live in one process (each with its own
/// node id), which is how the integration tests build clusters.
///
/// # Example
///
/// ```no_run
/// use meshwork_broker::{BrokerOptions, Service, ServiceBroker};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = ServiceBroker::new(BrokerOptions::new("node-1"));
/// broker
///     .publish_service(Service::new("math").action("add", |ctx| async move {
///         let a = ctx.params["a"].as_i64().unwrap_or(0);
///         let b = ctx.params["b"].as_i64().unwrap_or(0);
///         Ok(json!(a + b))
///     }))
///     .await;
/// broker.start().await?;
///
/// let sum = broker.call("math.add", json!({"a": 2, "b": 3}), Default::default()).await?;
/// assert_eq!(sum, json!(5));
/// # Ok(())
/// # }
/// ```
pub struct ServiceBroker {
    opts: BrokerOptions,
    registry: Arc<Registry>,
    discoverer: Arc<dyn Discoverer>,
    transit: Option<Arc<Transit>>,
    notifications: Mutex<Option<UnboundedReceiver<LifecycleNotification>>>,
    relay: Mutex<Option<UnboundedReceiver<Packet>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    event_counter: AtomicU64,
}

impl ServiceBroker {
    /// Creates a standalone broker with no transporter. Calls and events
    /// stay in-process; discovery runs only the availability sweeps.
    pub fn new(opts: BrokerOptions) -> Arc<Self> {
        let (registry, notifications) =
            Registry::new(opts.node_id.clone(), opts.registry.clone());
        let discoverer = Arc::new(LocalDiscoverer::new(
            registry.clone(),
            opts.discoverer.clone(),
        ));
        Arc::new(ServiceBroker {
            opts,
            registry,
            discoverer,
            transit: None,
            notifications: Mutex::new(Some(notifications)),
            relay: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            event_counter: AtomicU64::new(1),
        })
    }

    /// Creates a broker wired to a transporter, joining whatever cluster is
    /// reachable through it.
    pub fn with_transporter(opts: BrokerOptions, transporter: Arc<dyn Transporter>) -> Arc<Self> {
        let (registry, notifications) =
            Registry::new(opts.node_id.clone(), opts.registry.clone());
        let (relay_tx, relay_rx) = unbounded_channel();
        let discoverer = Arc::new(NetworkDiscoverer::new(
            registry.clone(),
            transporter.clone(),
            opts.serializer.clone(),
            relay_tx,
            opts.discoverer.clone(),
        ));
        let transit = Transit::new(registry.clone(), transporter, opts.serializer.clone());
        Arc::new(ServiceBroker {
            opts,
            registry,
            discoverer,
            transit: Some(transit),
            notifications: Mutex::new(Some(notifications)),
            relay: Mutex::new(Some(relay_rx)),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            event_counter: AtomicU64::new(1),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.opts.node_id
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn options(&self) -> &BrokerOptions {
        &self.opts
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Registers a local service. Safe before or after `start`; the catalog
    /// update is synchronous and the cluster is informed asynchronously.
    pub async fn publish_service(&self, service: Service) {
        self.registry.register_local_service(service.into_local()).await;
    }

    /// Starts the broker: lifecycle pumps, transit pump, then discovery.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(node_id = %self.opts.node_id, "broker starting");

        if self.opts.internal_services {
            self.publish_service(self.build_internal_service()).await;
        }

        let mut tasks = Vec::new();

        if let Some(mut notifications) = self.notifications.lock().expect("broker state").take() {
            let weak = Arc::downgrade(self);
            tasks.push(tokio::spawn(async move {
                while let Some(notification) = notifications.recv().await {
                    let Some(broker) = weak.upgrade() else { break };
                    broker.handle_notification(notification).await;
                }
            }));
        }

        if let Some(transit) = &self.transit {
            if let Some(mut relay) = self.relay.lock().expect("broker state").take() {
                let transit = transit.clone();
                tasks.push(tokio::spawn(async move {
                    while let Some(packet) = relay.recv().await {
                        transit.handle_packet(packet).await;
                    }
                }));
            }
        }

        self.tasks.lock().expect("broker state").extend(tasks);
        self.discoverer.start().await?;
        info!(node_id = %self.opts.node_id, "broker started");
        Ok(())
    }

    /// Stops discovery (announcing the departure when networked) and cancels
    /// the broker's background tasks.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.discoverer.stop().await;
        for task in self.tasks.lock().expect("broker state").drain(..) {
            task.abort();
        }
        info!(node_id = %self.opts.node_id, "broker stopped");
    }

    async fn handle_notification(self: &Arc<Self>, notification: LifecycleNotification) {
        debug!(event = notification.event_name(), "lifecycle notification");
        if matches!(
            notification,
            LifecycleNotification::ServicesChanged { local: true }
        ) {
            if let Err(err) = self.discoverer.send_info(Target::Broadcast).await {
                warn!(error = %err, "failed to broadcast INFO");
            }
        }
        self.broadcast_local(
            notification.event_name(),
            notification_payload(&notification),
            None,
        )
        .await;
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Calls an action somewhere in the cluster and awaits its result.
    pub async fn call(&self, action: &str, params: Value, opts: CallOptions) -> Result<Value> {
        if !self.is_started() {
            return Err(MeshworkError::NotStarted);
        }
        let mut ctx = Context::new(self.opts.node_id.clone(), action, params);
        if let Some(meta) = opts.meta {
            ctx = ctx.with_meta(meta);
        }
        ctx.timeout_ms = Some(
            opts.timeout_ms
                .unwrap_or(self.opts.request_timeout.as_millis() as u64),
        );
        self.call_with_context(ctx, opts.node_id).await
    }

    /// Calls an action with an explicit context, used for nested calls made
    /// from inside handlers (`ctx.child(...)`).
    pub async fn call_with_context(&self, ctx: Context, pinned: Option<String>) -> Result<Value> {
        if self.opts.max_call_level > 0 && ctx.level > self.opts.max_call_level {
            return Err(MeshworkError::MaxCallLevel { level: ctx.level });
        }

        let mut attempt = 0;
        loop {
            match self.call_attempt(&ctx, pinned.as_deref()).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if self.opts.retry.enabled
                        && err.is_retryable()
                        && attempt <= self.opts.retry.retries
                    {
                        let delay = self.opts.retry.backoff(attempt);
                        debug!(
                            action = %ctx.name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "retrying call"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn call_attempt(&self, ctx: &Context, pinned: Option<&str>) -> Result<Value> {
        let endpoint = self
            .registry
            .resolve_action(&ctx.name, Some(ctx), pinned)
            .await?;
        endpoint.breaker.acquire()?;

        let timeout = Duration::from_millis(
            ctx.timeout_ms
                .unwrap_or(self.opts.request_timeout.as_millis() as u64),
        );

        let outcome = if endpoint.local {
            match endpoint.handler.clone() {
                Some(handler) => match tokio::time::timeout(timeout, handler(ctx.clone())).await {
                    Ok(result) => result,
                    Err(_) => Err(MeshworkError::RequestTimeout {
                        action: ctx.name.clone(),
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                },
                None => Err(MeshworkError::ServiceNotAvailable {
                    action: ctx.name.clone(),
                }),
            }
        } else {
            match &self.transit {
                Some(transit) => transit.request(&endpoint.node_id, ctx, timeout).await,
                None => Err(MeshworkError::ServiceNotAvailable {
                    action: ctx.name.clone(),
                }),
            }
        };

        match &outcome {
            Ok(_) => endpoint.breaker.on_success(),
            Err(err) => endpoint.breaker.on_failure(err),
        }
        outcome
    }

    /// Runs several calls concurrently and returns their results in order.
    pub async fn mcall(
        &self,
        calls: Vec<(String, Value)>,
        opts: CallOptions,
    ) -> Vec<Result<Value>> {
        let futures = calls
            .into_iter()
            .map(|(action, params)| {
                let opts = opts.clone();
                async move { self.call(&action, params, opts).await }
            })
            .collect::<Vec<_>>();
        futures::future::join_all(futures).await
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Balanced event: delivered to one endpoint per subscriber group.
    pub async fn emit(&self, event: &str, data: Value, groups: Option<Vec<String>>) -> Result<()> {
        if !self.is_started() {
            return Err(MeshworkError::NotStarted);
        }
        let ctx = Context::new(self.opts.node_id.clone(), event, data.clone());
        let endpoints = self
            .registry
            .balanced_event_endpoints(event, groups.as_deref(), Some(&ctx))
            .await;

        // One packet per remote node, carrying every group that node won.
        let mut remote: HashMap<String, Vec<String>> = HashMap::new();
        for endpoint in endpoints {
            if endpoint.local {
                self.invoke_event_handler(&endpoint, event, data.clone());
            } else {
                remote
                    .entry(endpoint.node_id.clone())
                    .or_default()
                    .push(endpoint.group.clone());
            }
        }

        if let Some(transit) = &self.transit {
            for (node_id, node_groups) in remote {
                transit
                    .send_event(
                        &node_id,
                        EventPayload {
                            sender: self.opts.node_id.clone(),
                            id: self.event_counter.fetch_add(1, Ordering::Relaxed),
                            event: event.to_string(),
                            data: data.clone(),
                            groups: node_groups,
                            broadcast: false,
                        },
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Broadcast event: delivered to every matching endpoint on every
    /// available node.
    pub async fn broadcast(
        &self,
        event: &str,
        data: Value,
        groups: Option<Vec<String>>,
    ) -> Result<()> {
        if !self.is_started() {
            return Err(MeshworkError::NotStarted);
        }
        let endpoints = self
            .registry
            .broadcast_event_endpoints(event, groups.as_deref())
            .await;

        let mut remote_nodes = Vec::new();
        for endpoint in endpoints {
            if endpoint.local {
                self.invoke_event_handler(&endpoint, event, data.clone());
            } else if !remote_nodes.contains(&endpoint.node_id) {
                remote_nodes.push(endpoint.node_id.clone());
            }
        }

        if let Some(transit) = &self.transit {
            for node_id in remote_nodes {
                transit
                    .send_event(
                        &node_id,
                        EventPayload {
                            sender: self.opts.node_id.clone(),
                            id: self.event_counter.fetch_add(1, Ordering::Relaxed),
                            event: event.to_string(),
                            data: data.clone(),
                            groups: groups.clone().unwrap_or_default(),
                            broadcast: true,
                        },
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Broadcast restricted to this node's own subscribers. Never touches
    /// the transporter; this is also how lifecycle events are delivered.
    pub async fn broadcast_local(&self, event: &str, data: Value, groups: Option<Vec<String>>) {
        let mut endpoints = self.registry.local_event_endpoints(event).await;
        if let Some(gs) = &groups {
            endpoints.retain(|ep| gs.iter().any(|g| g == &ep.group));
        }
        for endpoint in endpoints {
            self.invoke_event_handler(&endpoint, event, data.clone());
        }
    }

    fn invoke_event_handler(
        &self,
        endpoint: &meshwork_registry::EventEndpoint,
        event: &str,
        data: Value,
    ) {
        let Some(handler) = endpoint.handler.clone() else {
            return;
        };
        let mut ctx = Context::new(self.opts.node_id.clone(), event, data);
        ctx.event_group = Some(endpoint.group.clone());
        tokio::spawn(async move {
            handler(ctx).await;
        });
    }

    // ------------------------------------------------------------------
    // Internal services
    // ------------------------------------------------------------------

    /// The `$node` introspection service, mirroring the registry's listing
    /// operations as callable actions.
    fn build_internal_service(&self) -> Service {
        let registry = self.registry.clone();
        let service = Service::new("$node");

        let reg = registry.clone();
        let service = service.action("list", move |ctx| {
            let reg = reg.clone();
            async move {
                let items = reg.list_nodes(list_options(&ctx.params)).await;
                Ok(serde_json::to_value(items)?)
            }
        });

        let reg = registry.clone();
        let service = service.action("services", move |ctx| {
            let reg = reg.clone();
            async move {
                let items = reg.list_services(list_options(&ctx.params)).await;
                Ok(serde_json::to_value(items)?)
            }
        });

        let reg = registry.clone();
        let service = service.action("actions", move |ctx| {
            let reg = reg.clone();
            async move {
                let items = reg.list_actions(list_options(&ctx.params)).await;
                Ok(serde_json::to_value(items)?)
            }
        });

        let reg = registry;
        service.action("events", move |ctx| {
            let reg = reg.clone();
            async move {
                let items = reg.list_events(list_options(&ctx.params)).await;
                Ok(serde_json::to_value(items)?)
            }
        })
    }
}

fn list_options(params: &Value) -> meshwork_registry::ListOptions {
    let mut opts = meshwork_registry::ListOptions::default();
    opts.only_local = params["onlyLocal"].as_bool().unwrap_or(false);
    opts.only_available = params["onlyAvailable"].as_bool().unwrap_or(false);
    opts.skip_internal = params["skipInternal"].as_bool().unwrap_or(false);
    opts.with_endpoints = params["withEndpoints"].as_bool().unwrap_or(false);
    opts
}

fn notification_payload(notification: &LifecycleNotification) -> Value {
    match notification {
        LifecycleNotification::NodeConnected {
            node_id,
            reconnected,
        } => json!({ "node": node_id, "reconnected": reconnected }),
        LifecycleNotification::NodeUpdated { node_id } => json!({ "node": node_id }),
        LifecycleNotification::NodeDisconnected {
            node_id,
            unexpected,
        } => json!({ "node": node_id, "unexpected": unexpected }),
        LifecycleNotification::ServicesChanged { local } => json!({ "localService": local }),
        LifecycleNotification::BreakerOpened { node_id, action }
        | LifecycleNotification::BreakerHalfOpened { node_id, action }
        | LifecycleNotification::BreakerClosed { node_id, action } => {
            json!({ "nodeID": node_id, "action": action })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn math_service() -> Service {
        Service::new("math")
            .action("add", |ctx| async move {
                let a = ctx.params["a"].as_i64().unwrap_or(0);
                let b = ctx.params["b"].as_i64().unwrap_or(0);
                Ok(json!(a + b))
            })
            .action("fail", |_ctx| async move {
                Err(MeshworkError::Transport("boom".to_string()))
            })
    }

    #[tokio::test]
    async fn test_local_call() {
        let broker = ServiceBroker::new(BrokerOptions::new("node-1"));
        broker.publish_service(math_service()).await;
        broker.start().await.unwrap();

        let result = broker
            .call("math.add", json!({"a": 2, "b": 3}), CallOptions::default())
            .await
            .unwrap();
        assert_eq!(result, json!(5));
        broker.stop().await;
    }

    #[tokio::test]
    async fn test_call_before_start_is_rejected() {
        let broker = ServiceBroker::new(BrokerOptions::new("node-1"));
        broker.publish_service(math_service()).await;
        let err = broker
            .call("math.add", json!({}), CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MeshworkError::NotStarted));
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let broker = ServiceBroker::new(BrokerOptions::new("node-1"));
        broker.start().await.unwrap();
        let err = broker
            .call("ghost.spooky", json!({}), CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MeshworkError::ServiceNotFound { .. }));
        broker.stop().await;
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let broker = ServiceBroker::new(BrokerOptions::new("node-1"));
        broker.publish_service(math_service()).await;
        broker.start().await.unwrap();
        let err = broker
            .call("math.fail", json!({}), CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MeshworkError::Transport(_)));
        broker.stop().await;
    }

    #[tokio::test]
    async fn test_local_call_timeout() {
        let broker = ServiceBroker::new(BrokerOptions::new("node-1"));
        broker
            .publish_service(Service::new("slow").action("nap", |_ctx| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(json!(null))
            }))
            .await;
        broker.start().await.unwrap();

        let err = broker
            .call(
                "slow.nap",
                json!({}),
                CallOptions::default().with_timeout(20),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MeshworkError::RequestTimeout { .. }));
        broker.stop().await;
    }

    #[tokio::test]
    async fn test_mcall_preserves_order() {
        let broker = ServiceBroker::new(BrokerOptions::new("node-1"));
        broker.publish_service(math_service()).await;
        broker.start().await.unwrap();

        let results = broker
            .mcall(
                vec![
                    ("math.add".to_string(), json!({"a": 1, "b": 1})),
                    ("ghost.spooky".to_string(), json!({})),
                    ("math.add".to_string(), json!({"a": 2, "b": 2})),
                ],
                CallOptions::default(),
            )
            .await;
        assert_eq!(results.len(), 3);
        assert_eq!(*results[0].as_ref().unwrap(), json!(2));
        assert!(results[1].is_err());
        assert_eq!(*results[2].as_ref().unwrap(), json!(4));
        broker.stop().await;
    }

    #[tokio::test]
    async fn test_max_call_level_guard() {
        let broker = ServiceBroker::new(BrokerOptions::new("node-1"));
        broker.publish_service(math_service()).await;
        broker.start().await.unwrap();

        let ctx = Context::new("node-1", "math.add", json!({})).with_level(101);
        let err = broker.call_with_context(ctx, None).await.unwrap_err();
        assert!(matches!(err, MeshworkError::MaxCallLevel { level: 101 }));
        broker.stop().await;
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failure() {
        use std::sync::atomic::AtomicU32;

        let mut opts = BrokerOptions::new("node-1");
        opts.retry.enabled = true;
        opts.retry.retries = 3;
        opts.retry.delay = Duration::from_millis(1);
        let broker = ServiceBroker::new(opts);

        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        broker
            .publish_service(Service::new("flaky").action("once", move |_ctx| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(MeshworkError::Transport("first attempt fails".to_string()))
                    } else {
                        Ok(json!("ok"))
                    }
                }
            }))
            .await;
        broker.start().await.unwrap();

        let result = broker
            .call("flaky.once", json!({}), CallOptions::default())
            .await
            .unwrap();
        assert_eq!(result, json!("ok"));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        broker.stop().await;
    }

    #[tokio::test]
    async fn test_business_errors_are_not_retried() {
        use std::sync::atomic::AtomicU32;

        let mut opts = BrokerOptions::new("node-1");
        opts.retry.enabled = true;
        opts.retry.retries = 3;
        opts.retry.delay = Duration::from_millis(1);
        let broker = ServiceBroker::new(opts);

        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        broker
            .publish_service(Service::new("strict").action("reject", move |_ctx| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(MeshworkError::Remote {
                        node_id: "node-1".to_string(),
                        message: "validation failed".to_string(),
                    })
                }
            }))
            .await;
        broker.start().await.unwrap();

        assert!(broker
            .call("strict.reject", json!({}), CallOptions::default())
            .await
            .is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        broker.stop().await;
    }

    #[tokio::test]
    async fn test_broadcast_local_reaches_all_groups() {
        let broker = ServiceBroker::new(BrokerOptions::new("node-1"));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        for name in ["mail", "push"] {
            let tx = tx.clone();
            broker
                .publish_service(Service::new(name).event("user.created", move |ctx| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(ctx.event_group.unwrap_or_default());
                    }
                }))
                .await;
        }
        broker.start().await.unwrap();

        broker
            .broadcast_local("user.created", json!({"id": 1}), None)
            .await;

        let mut groups = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        groups.sort();
        assert_eq!(groups, vec!["mail", "push"]);
        broker.stop().await;
    }

    #[tokio::test]
    async fn test_emit_hits_one_handler_per_group() {
        let broker = ServiceBroker::new(BrokerOptions::new("node-1"));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        for name in ["mail", "push"] {
            let tx = tx.clone();
            broker
                .publish_service(Service::new(name).event("user.created", move |ctx| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(ctx.event_group.unwrap_or_default());
                    }
                }))
                .await;
        }
        broker.start().await.unwrap();

        broker.emit("user.created", json!({}), None).await.unwrap();

        let mut groups = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        groups.sort();
        assert_eq!(groups, vec!["mail", "push"]);
        assert!(rx.try_recv().is_err());
        broker.stop().await;
    }

    #[tokio::test]
    async fn test_emit_group_filter() {
        let broker = ServiceBroker::new(BrokerOptions::new("node-1"));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        for name in ["mail", "push"] {
            let tx = tx.clone();
            broker
                .publish_service(Service::new(name).event("user.created", move |ctx| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(ctx.event_group.unwrap_or_default());
                    }
                }))
                .await;
        }
        broker.start().await.unwrap();

        broker
            .emit("user.created", json!({}), Some(vec!["push".to_string()]))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), "push");
        assert!(rx.try_recv().is_err());
        broker.stop().await;
    }

    #[tokio::test]
    async fn test_internal_node_list_action() {
        let broker = ServiceBroker::new(BrokerOptions::new("node-1"));
        broker.start().await.unwrap();

        let nodes = broker
            .call("$node.list", json!({}), CallOptions::default())
            .await
            .unwrap();
        assert_eq!(nodes.as_array().unwrap().len(), 1);
        assert_eq!(nodes[0]["id"], json!("node-1"));
        broker.stop().await;
    }

    #[tokio::test]
    async fn test_internal_services_action_skips_internal() {
        let broker = ServiceBroker::new(BrokerOptions::new("node-1"));
        broker.publish_service(math_service()).await;
        broker.start().await.unwrap();

        let services = broker
            .call(
                "$node.services",
                json!({"skipInternal": true}),
                CallOptions::default(),
            )
            .await
            .unwrap();
        let names: Vec<&str> = services
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["math"]);
        broker.stop().await;
    }

    #[tokio::test]
    async fn test_lifecycle_event_rebroadcast() {
        let broker = ServiceBroker::new(BrokerOptions::new("node-1"));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Value>();
        broker
            .publish_service(Service::new("watcher").event("$node.connected", move |ctx| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(ctx.params);
                }
            }))
            .await;
        broker.start().await.unwrap();

        // Inject a remote INFO straight into the registry; the notification
        // pump must re-deliver it as a local $node.connected event.
        broker
            .registry()
            .process_node_info(meshwork_common::InfoPayload {
                sender: "node-2".to_string(),
                instance_id: "i1".to_string(),
                seq: 1,
                services: Vec::new(),
                metadata: None,
                ip_list: Vec::new(),
                client: None,
            })
            .await;

        let payload = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload["node"], json!("node-2"));
        broker.stop().await;
    }
}
