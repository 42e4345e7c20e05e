//! Service definition builder.
//!
//! A [`Service`] pairs the wire-visible schema (what INFO packets advertise)
//! with the local handler functions. Action names are qualified with the
//! service's full name, so a service `math` with an action `add` is invoked
//! as `math.add` (or `v2.math.add` when versioned).

use futures::future::BoxFuture;
use meshwork_common::{ActionInfo, Context, EventInfo, Result, ServiceInfo};
use meshwork_registry::{ActionHandler, EventHandler, LocalService};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Builder for a locally hosted service.
///
/// # Example
///
/// ```
/// use meshwork_broker::Service;
/// use serde_json::json;
///
/// let service = Service::new("math").action("add", |ctx| async move {
///     let a = ctx.params["a"].as_i64().unwrap_or(0);
///     let b = ctx.params["b"].as_i64().unwrap_or(0);
///     Ok(json!(a + b))
/// });
/// assert_eq!(service.info().name, "math");
/// ```
pub struct Service {
    inner: LocalService,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Service {
            inner: LocalService::new(ServiceInfo::new(name)),
        }
    }

    /// Sets the service version; the full name becomes `v{n}.{name}`.
    pub fn version(mut self, version: u32) -> Self {
        self.inner.info.version = Some(version);
        self
    }

    pub fn settings(mut self, settings: Value) -> Self {
        self.inner.info.settings = Some(settings);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.inner.info.metadata = Some(metadata);
        self
    }

    /// Adds an action. `name` is the short name; the advertised name is
    /// qualified with the service's full name.
    pub fn action<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let full = format!("{}.{}", self.inner.info.full_name(), name.into());
        self.inner
            .info
            .actions
            .insert(full.clone(), ActionInfo::new(full.clone()));
        let handler: ActionHandler =
            Arc::new(move |ctx| Box::pin(handler(ctx)) as BoxFuture<'static, Result<Value>>);
        self.inner.action_handlers.insert(full, handler);
        self
    }

    /// Subscribes to an event in the service's default group (the service
    /// name). The name may contain wildcards.
    pub fn event<F, Fut>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.event_impl(name.into(), None, handler)
    }

    /// Subscribes to an event in an explicit competing-consumer group.
    pub fn event_in_group<F, Fut>(
        self,
        name: impl Into<String>,
        group: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.event_impl(name.into(), Some(group.into()), handler)
    }

    fn event_impl<F, Fut>(mut self, name: String, group: Option<String>, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut info = EventInfo::new(name.clone());
        info.group = group;
        self.inner.info.events.insert(name.clone(), info);
        let handler: EventHandler =
            Arc::new(move |ctx| Box::pin(handler(ctx)) as BoxFuture<'static, ()>);
        self.inner.event_handlers.insert(name, handler);
        self
    }

    pub fn info(&self) -> &ServiceInfo {
        &self.inner.info
    }

    pub fn full_name(&self) -> String {
        self.inner.info.full_name()
    }

    pub(crate) fn into_local(self) -> LocalService {
        self.inner
    }
}
