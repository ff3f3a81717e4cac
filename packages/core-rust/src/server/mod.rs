//! Inbound RPC server contract.
//!
//! A [`Server`] hosts [`Handler`]s and [`Subscriber`]s, exposes them on a
//! transport and broker, and keeps its registry record alive while running.

pub mod handler;
pub mod local;
pub mod router;
pub mod wrapper;
mod worker;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use uuid::Uuid;

use crate::broker::Broker;
use crate::registry::Registry;
use crate::trace::Tracer;
use crate::transport::Transport;

pub use handler::{
    endpoint_fn, subscriber_fn, EndpointFn, Handler, HandlerOption, HandlerOptions, Subscriber,
    SubscriberFn, SubscriberOption, SubscriberOptions,
};
pub use local::LocalServer;
pub use wrapper::{
    compose_handler, compose_subscriber, HandlerService, HandlerWrapper, InboundMessage,
    InboundRequest, SubscriberService, SubscriberWrapper,
};

pub const DEFAULT_NAME: &str = "plexus.server";
pub const DEFAULT_VERSION: &str = "latest";
pub const DEFAULT_ADDRESS: &str = ":0";
pub const DEFAULT_REGISTER_TTL: Duration = Duration::from_secs(90);
pub const DEFAULT_REGISTER_INTERVAL: Duration = Duration::from_secs(30);

/// Health gate run before every (re-)registration.
pub type RegisterCheck = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

// ---------------------------------------------------------------------------
// ServerOptions
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ServerOptions {
    pub name: String,
    pub id: String,
    pub version: String,
    /// Address to listen on.
    pub address: String,
    /// Address to advertise in the registry instead of the bound address.
    pub advertise: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub broker: Arc<dyn Broker>,
    pub registry: Arc<dyn Registry>,
    pub transport: Arc<dyn Transport>,
    pub tracer: Option<Arc<dyn Tracer>>,
    /// First registered is outermost.
    pub handler_wrappers: Vec<Arc<dyn HandlerWrapper>>,
    /// First registered is outermost.
    pub subscriber_wrappers: Vec<Arc<dyn SubscriberWrapper>>,
    pub register_ttl: Duration,
    pub register_interval: Duration,
    pub register_check: Option<RegisterCheck>,
}

impl ServerOptions {
    #[must_use]
    pub fn new(
        broker: Arc<dyn Broker>,
        registry: Arc<dyn Registry>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            id: Uuid::new_v4().to_string(),
            version: DEFAULT_VERSION.to_string(),
            address: DEFAULT_ADDRESS.to_string(),
            advertise: None,
            metadata: BTreeMap::new(),
            broker,
            registry,
            transport,
            tracer: None,
            handler_wrappers: Vec::new(),
            subscriber_wrappers: Vec::new(),
            register_ttl: DEFAULT_REGISTER_TTL,
            register_interval: DEFAULT_REGISTER_INTERVAL,
            register_check: None,
        }
    }

    /// Applies `opts` in order.
    pub fn apply(&mut self, opts: Vec<ServerOption>) {
        for opt in opts {
            match opt {
                ServerOption::Name(n) => self.name = n,
                ServerOption::Id(id) => self.id = id,
                ServerOption::Version(v) => self.version = v,
                ServerOption::Address(a) => self.address = a,
                ServerOption::Advertise(a) => self.advertise = Some(a),
                ServerOption::Metadata(md) => self.metadata = md,
                ServerOption::Broker(b) => self.broker = b,
                ServerOption::Registry(r) => self.registry = r,
                ServerOption::Transport(t) => self.transport = t,
                ServerOption::Tracer(t) => self.tracer = Some(t),
                ServerOption::WrapHandler(w) => self.handler_wrappers.extend(w),
                ServerOption::WrapSubscriber(w) => self.subscriber_wrappers.extend(w),
                ServerOption::RegisterTtl(t) => self.register_ttl = t,
                ServerOption::RegisterInterval(i) => self.register_interval = i,
                ServerOption::RegisterCheck(c) => self.register_check = Some(c),
            }
        }
    }

    /// Registry node id, `"<name>-<id>"`.
    #[must_use]
    pub fn node_id(&self) -> String {
        format!("{}-{}", self.name, self.id)
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("version", &self.version)
            .field("address", &self.address)
            .field("advertise", &self.advertise)
            .field("metadata", &self.metadata)
            .field("broker", &self.broker.kind())
            .field("registry", &self.registry.kind())
            .field("transport", &self.transport.kind())
            .field("handler_wrappers", &self.handler_wrappers.len())
            .field("subscriber_wrappers", &self.subscriber_wrappers.len())
            .field("register_ttl", &self.register_ttl)
            .field("register_interval", &self.register_interval)
            .finish_non_exhaustive()
    }
}

#[non_exhaustive]
pub enum ServerOption {
    Name(String),
    Id(String),
    Version(String),
    Address(String),
    Advertise(String),
    Metadata(BTreeMap<String, String>),
    Broker(Arc<dyn Broker>),
    Registry(Arc<dyn Registry>),
    Transport(Arc<dyn Transport>),
    Tracer(Arc<dyn Tracer>),
    /// Appends handler wrappers after any already registered.
    WrapHandler(Vec<Arc<dyn HandlerWrapper>>),
    /// Appends subscriber wrappers after any already registered.
    WrapSubscriber(Vec<Arc<dyn SubscriberWrapper>>),
    RegisterTtl(Duration),
    RegisterInterval(Duration),
    RegisterCheck(RegisterCheck),
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Server: Send + Sync {
    /// Applies options. Later options override earlier ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the configuration.
    fn init(&self, opts: Vec<ServerOption>) -> anyhow::Result<()>;

    fn options(&self) -> ServerOptions;

    /// Registers a handler. Handlers are routed from the next `start`.
    ///
    /// # Errors
    ///
    /// Returns an error if a handler with the same name is registered.
    fn handle(&self, handler: Handler) -> anyhow::Result<()>;

    fn new_handler(&self, name: &str, opts: Vec<HandlerOption>) -> Handler {
        Handler::new(name).with_options(opts)
    }

    fn new_subscriber(
        &self,
        topic: &str,
        func: SubscriberFn,
        opts: Vec<SubscriberOption>,
    ) -> Subscriber {
        Subscriber::new(topic, func, opts)
    }

    /// Registers a subscriber. Subscribers are attached from the next `start`.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscriber cannot be accepted.
    fn subscribe(&self, subscriber: Subscriber) -> anyhow::Result<()>;

    /// # Errors
    ///
    /// Returns an error if listening, connecting or registering fails.
    async fn start(&self) -> anyhow::Result<()>;

    /// # Errors
    ///
    /// Returns the last error hit while tearing down.
    async fn stop(&self) -> anyhow::Result<()>;

    fn kind(&self) -> &'static str;
}
