//! Handler and subscriber definitions registered on a server.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::context::RequestContext;
use crate::error::CallError;
use crate::registry::Endpoint;

/// One endpoint implementation: request context and JSON body in, JSON out.
pub type EndpointFn =
    Arc<dyn Fn(RequestContext, Value) -> BoxFuture<'static, Result<Value, CallError>> + Send + Sync>;

/// Callback for messages delivered to a subscribed topic.
pub type SubscriberFn =
    Arc<dyn Fn(RequestContext, Value) -> BoxFuture<'static, Result<(), CallError>> + Send + Sync>;

/// Adapts an async closure into an [`EndpointFn`].
pub fn endpoint_fn<F, Fut>(f: F) -> EndpointFn
where
    F: Fn(RequestContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CallError>> + Send + 'static,
{
    Arc::new(
        move |ctx: RequestContext, body: Value| -> BoxFuture<'static, Result<Value, CallError>> {
            Box::pin(f(ctx, body))
        },
    )
}

/// Adapts an async closure into a [`SubscriberFn`].
pub fn subscriber_fn<F, Fut>(f: F) -> SubscriberFn
where
    F: Fn(RequestContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), CallError>> + Send + 'static,
{
    Arc::new(
        move |ctx: RequestContext, payload: Value| -> BoxFuture<'static, Result<(), CallError>> {
            Box::pin(f(ctx, payload))
        },
    )
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct HandlerOptions {
    /// Internal handlers are routed but not advertised in the registry.
    pub internal: bool,
    /// Metadata attached to every advertised endpoint.
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum HandlerOption {
    Internal(bool),
    Metadata(BTreeMap<String, String>),
}

/// A named group of endpoints, addressed as `"<Handler>.<Method>"`.
#[derive(Clone)]
pub struct Handler {
    name: String,
    endpoints: BTreeMap<String, EndpointFn>,
    options: HandlerOptions,
}

impl Handler {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoints: BTreeMap::new(),
            options: HandlerOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, opts: Vec<HandlerOption>) -> Self {
        for opt in opts {
            match opt {
                HandlerOption::Internal(i) => self.options.internal = i,
                HandlerOption::Metadata(md) => self.options.metadata = md,
            }
        }
        self
    }

    /// Adds `method` taking and returning raw JSON.
    #[must_use]
    pub fn endpoint<F, Fut>(mut self, method: &str, f: F) -> Self
    where
        F: Fn(RequestContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CallError>> + Send + 'static,
    {
        self.endpoints
            .insert(format!("{}.{method}", self.name), endpoint_fn(f));
        self
    }

    /// Adds `method` with typed request and response bodies.
    #[must_use]
    pub fn typed<Req, Resp, F, Fut>(self, method: &str, f: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + 'static,
        F: Fn(RequestContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, CallError>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.endpoint(method, move |ctx, body| {
            let f = Arc::clone(&f);
            async move {
                let req: Req = serde_json::from_value(body)
                    .map_err(|e| CallError::BadRequest(e.to_string()))?;
                let resp = f(ctx, req).await?;
                Ok::<Value, CallError>(serde_json::to_value(resp)?)
            }
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn options(&self) -> &HandlerOptions {
        &self.options
    }

    /// Endpoints keyed by their full `"<Handler>.<Method>"` name.
    pub fn endpoints(&self) -> impl Iterator<Item = (&str, &EndpointFn)> {
        self.endpoints.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Registry view of this handler's endpoints.
    #[must_use]
    pub fn describe(&self) -> Vec<Endpoint> {
        self.endpoints
            .keys()
            .map(|name| Endpoint {
                name: name.clone(),
                metadata: self.options.metadata.clone(),
            })
            .collect()
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("endpoints", &self.endpoints.keys().collect::<Vec<_>>())
            .field("options", &self.options)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Subscriber
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SubscriberOptions {
    /// Subscribers sharing a queue split deliveries between them.
    pub queue: Option<String>,
    pub internal: bool,
}

#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SubscriberOption {
    Queue(String),
    Internal(bool),
}

#[derive(Clone)]
pub struct Subscriber {
    pub topic: String,
    pub func: SubscriberFn,
    pub options: SubscriberOptions,
}

impl Subscriber {
    #[must_use]
    pub fn new(topic: impl Into<String>, func: SubscriberFn, opts: Vec<SubscriberOption>) -> Self {
        let mut options = SubscriberOptions::default();
        for opt in opts {
            match opt {
                SubscriberOption::Queue(q) => options.queue = Some(q),
                SubscriberOption::Internal(i) => options.internal = i,
            }
        }
        Self {
            topic: topic.into(),
            func,
            options,
        }
    }

    /// Registry view of this subscriber.
    #[must_use]
    pub fn describe(&self) -> Endpoint {
        let mut metadata = BTreeMap::new();
        metadata.insert("topic".to_string(), self.topic.clone());
        metadata.insert("subscriber".to_string(), "true".to_string());
        Endpoint {
            name: self.topic.clone(),
            metadata,
        }
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("topic", &self.topic)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
