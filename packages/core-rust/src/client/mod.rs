//! Outbound RPC client contract.
//!
//! A [`Client`] issues request/response calls, pseudo-streams and broker
//! publications on behalf of a service. Whole-client decorators (see the
//! service crate) implement the same trait and delegate to an inner client.

pub mod local;
pub mod wrapper;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::broker::Broker;
use crate::context::RequestContext;
use crate::error::CallError;
use crate::metadata::Metadata;
use crate::registry::Registry;
use crate::transport::Transport;

pub use local::LocalClient;
pub use wrapper::{compose_call, CallService, CallWrapper, OutboundCall};

/// Body encoding used when none is configured.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Per-call deadline used when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Request / Response / Publication
// ---------------------------------------------------------------------------

/// A request addressed to `service`'s `endpoint` (e.g. `"Greeter.Hello"`).
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub service: String,
    pub endpoint: String,
    pub body: Value,
    pub content_type: String,
}

impl Request {
    #[must_use]
    pub fn new(service: impl Into<String>, endpoint: impl Into<String>, body: Value) -> Self {
        Self {
            service: service.into(),
            endpoint: endpoint.into(),
            body,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
        }
    }

    /// Builds a request from any serializable body.
    ///
    /// # Errors
    ///
    /// Returns `CallError::Codec` if `body` cannot be represented as JSON.
    pub fn encode<T: Serialize>(
        service: impl Into<String>,
        endpoint: impl Into<String>,
        body: &T,
    ) -> Result<Self, CallError> {
        Ok(Self::new(service, endpoint, serde_json::to_value(body)?))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub body: Value,
    pub header: Metadata,
}

impl Response {
    #[must_use]
    pub fn new(body: Value) -> Self {
        Self {
            body,
            header: Metadata::new(),
        }
    }

    /// Decodes the body into `T`.
    ///
    /// # Errors
    ///
    /// Returns `CallError::Codec` if the body does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, CallError> {
        Ok(T::deserialize(&self.body)?)
    }
}

/// A message published to a broker topic through the client.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub topic: String,
    pub payload: Value,
    pub content_type: String,
}

impl Publication {
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
        }
    }
}

/// Per-call knobs.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Replace any caller-supplied `Authorization` header with the service's
    /// own token.
    pub service_token: bool,
    /// Overrides the client's default request timeout.
    pub request_timeout: Option<Duration>,
    /// Skips registry lookup and calls this address directly.
    pub address: Option<String>,
}

// ---------------------------------------------------------------------------
// ClientOptions
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ClientOptions {
    pub broker: Arc<dyn Broker>,
    pub registry: Arc<dyn Registry>,
    pub transport: Arc<dyn Transport>,
    /// Call-path wrappers, first registered is outermost.
    pub call_wrappers: Vec<Arc<dyn CallWrapper>>,
    pub content_type: String,
    pub request_timeout: Duration,
}

impl ClientOptions {
    #[must_use]
    pub fn new(
        broker: Arc<dyn Broker>,
        registry: Arc<dyn Registry>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            broker,
            registry,
            transport,
            call_wrappers: Vec::new(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Applies `opts` in order.
    pub fn apply(&mut self, opts: Vec<ClientOption>) {
        for opt in opts {
            match opt {
                ClientOption::Broker(b) => self.broker = b,
                ClientOption::Registry(r) => self.registry = r,
                ClientOption::Transport(t) => self.transport = t,
                ClientOption::WrapCall(w) => self.call_wrappers.extend(w),
                ClientOption::ContentType(ct) => self.content_type = ct,
                ClientOption::RequestTimeout(t) => self.request_timeout = t,
            }
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("broker", &self.broker.kind())
            .field("registry", &self.registry.kind())
            .field("transport", &self.transport.kind())
            .field("call_wrappers", &self.call_wrappers.len())
            .field("content_type", &self.content_type)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[non_exhaustive]
pub enum ClientOption {
    Broker(Arc<dyn Broker>),
    Registry(Arc<dyn Registry>),
    Transport(Arc<dyn Transport>),
    /// Appends call-path wrappers after any already registered.
    WrapCall(Vec<Arc<dyn CallWrapper>>),
    ContentType(String),
    RequestTimeout(Duration),
}

// ---------------------------------------------------------------------------
// Client / CallStream
// ---------------------------------------------------------------------------

/// Client half of a stream. Each `send` is answered by one queued reply.
#[async_trait]
pub trait CallStream: Send {
    fn context(&self) -> &RequestContext;

    fn request(&self) -> &Request;

    /// # Errors
    ///
    /// Returns the call error of the underlying exchange, or `BadRequest`
    /// if the stream is closed.
    async fn send(&mut self, body: Value) -> Result<(), CallError>;

    /// Next reply, or `None` once all replies have been drained.
    ///
    /// # Errors
    ///
    /// Reserved for transports that fail on receive.
    async fn recv(&mut self) -> Result<Option<Value>, CallError>;

    /// # Errors
    ///
    /// Reserved for transports that fail on close.
    async fn close(&mut self) -> Result<(), CallError>;
}

#[async_trait]
pub trait Client: Send + Sync {
    /// Applies options. Later options override earlier ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the client rejects the configuration.
    fn init(&self, opts: Vec<ClientOption>) -> anyhow::Result<()>;

    fn options(&self) -> ClientOptions;

    /// # Errors
    ///
    /// Returns the `CallError` produced by resolution, transport or the
    /// remote handler.
    async fn call(
        &self,
        ctx: RequestContext,
        req: Request,
        opts: CallOptions,
    ) -> Result<Response, CallError>;

    /// # Errors
    ///
    /// Returns `CallError::ServiceNotFound` if the target cannot be resolved.
    async fn stream(
        &self,
        ctx: RequestContext,
        req: Request,
        opts: CallOptions,
    ) -> Result<Box<dyn CallStream>, CallError>;

    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded or the broker
    /// rejects it.
    async fn publish(&self, ctx: RequestContext, msg: Publication) -> Result<(), CallError>;

    fn kind(&self) -> &'static str;
}
