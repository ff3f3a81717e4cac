//! In-process server on top of the configured transport, broker and registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tower::util::BoxCloneService;
use tower::{service_fn, ServiceExt};
use tracing::{debug, info, warn};

use super::router::{Router, ServerDispatcher};
use super::worker::Heartbeat;
use super::wrapper::{compose_handler, compose_subscriber, InboundMessage};
use super::{Handler, Server, ServerOption, ServerOptions, Subscriber};
use crate::broker::{Broker, BrokerHandler, BrokerMessage, SubscribeOptions, Subscription};
use crate::context::RequestContext;
use crate::registry::{Node, RegisterOptions, Registry, Service};
use crate::transport::{Listener, Transport};

/// State held only while the server is running.
struct Running {
    listener: Box<dyn Listener>,
    subscriptions: Vec<Box<dyn Subscription>>,
    heartbeat: Heartbeat,
    record: Service,
    broker: Arc<dyn Broker>,
    registry: Arc<dyn Registry>,
}

pub struct LocalServer {
    options: RwLock<ServerOptions>,
    handlers: RwLock<BTreeMap<String, Handler>>,
    subscribers: RwLock<Vec<Subscriber>>,
    running: tokio::sync::Mutex<Option<Running>>,
    /// Address actually bound while running.
    bound: Mutex<Option<String>>,
}

impl LocalServer {
    #[must_use]
    pub fn new(
        broker: Arc<dyn Broker>,
        registry: Arc<dyn Registry>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            options: RwLock::new(ServerOptions::new(broker, registry, transport)),
            handlers: RwLock::new(BTreeMap::new()),
            subscribers: RwLock::new(Vec::new()),
            running: tokio::sync::Mutex::new(None),
            bound: Mutex::new(None),
        }
    }

    /// Address the transport listener is bound to, while running.
    #[must_use]
    pub fn bound_address(&self) -> Option<String> {
        self.bound.lock().clone()
    }

    /// Undoes a partial start. Failures are logged; the start error wins.
    async fn rollback(opts: &ServerOptions, listener: &dyn Listener, subscriptions: &[Box<dyn Subscription>]) {
        for sub in subscriptions {
            if let Err(e) = sub.unsubscribe().await {
                warn!(server = %opts.name, topic = sub.topic(), error = %e, "unsubscribe failed");
            }
        }
        if let Err(e) = listener.close().await {
            warn!(server = %opts.name, error = %e, "listener close failed");
        }
    }

    fn record(
        opts: &ServerOptions,
        address: &str,
        handlers: &[Handler],
        subscribers: &[Subscriber],
    ) -> Service {
        let mut endpoints = Vec::new();
        for handler in handlers.iter().filter(|h| !h.options().internal) {
            endpoints.extend(handler.describe());
        }
        for sub in subscribers.iter().filter(|s| !s.options.internal) {
            endpoints.push(sub.describe());
        }

        let mut node_md = opts.metadata.clone();
        node_md.insert("transport".to_string(), opts.transport.kind().to_string());
        node_md.insert("broker".to_string(), opts.broker.kind().to_string());
        node_md.insert("registry".to_string(), opts.registry.kind().to_string());
        node_md.insert("server".to_string(), "local".to_string());

        Service {
            name: opts.name.clone(),
            version: opts.version.clone(),
            metadata: opts.metadata.clone(),
            endpoints,
            nodes: vec![Node {
                id: opts.node_id(),
                address: opts.advertise.clone().unwrap_or_else(|| address.to_string()),
                metadata: node_md,
            }],
        }
    }

    async fn attach(
        opts: &ServerOptions,
        subscribers: &[Subscriber],
    ) -> anyhow::Result<Vec<Box<dyn Subscription>>> {
        let mut subscriptions = Vec::with_capacity(subscribers.len());
        for sub in subscribers {
            let func = Arc::clone(&sub.func);
            let base = BoxCloneService::new(service_fn(move |msg: InboundMessage| {
                func(msg.ctx, msg.payload)
            }));
            let pipeline = Arc::new(Mutex::new(compose_subscriber(base, &opts.subscriber_wrappers)));

            let topic = sub.topic.clone();
            let handler: BrokerHandler =
                Arc::new(move |msg: BrokerMessage| -> BoxFuture<'static, anyhow::Result<()>> {
                    let svc = pipeline.lock().clone();
                    let topic = topic.clone();
                    Box::pin(async move {
                        let payload = if msg.body.is_empty() {
                            Value::Null
                        } else {
                            serde_json::from_slice(&msg.body)?
                        };
                        let inbound = InboundMessage {
                            ctx: RequestContext::from_metadata(msg.header),
                            topic,
                            payload,
                        };
                        svc.oneshot(inbound).await?;
                        Ok::<_, anyhow::Error>(())
                    })
                });

            let subscription = opts
                .broker
                .subscribe(
                    &sub.topic,
                    handler,
                    SubscribeOptions {
                        queue: sub.options.queue.clone(),
                    },
                )
                .await?;
            debug!(topic = %sub.topic, "subscribed");
            subscriptions.push(subscription);
        }
        Ok(subscriptions)
    }
}

#[async_trait]
impl Server for LocalServer {
    fn init(&self, opts: Vec<ServerOption>) -> anyhow::Result<()> {
        self.options.write().apply(opts);
        Ok(())
    }

    fn options(&self) -> ServerOptions {
        self.options.read().clone()
    }

    fn handle(&self, handler: Handler) -> anyhow::Result<()> {
        let mut handlers = self.handlers.write();
        if handlers.contains_key(handler.name()) {
            anyhow::bail!("handler {} already registered", handler.name());
        }
        handlers.insert(handler.name().to_string(), handler);
        Ok(())
    }

    fn subscribe(&self, subscriber: Subscriber) -> anyhow::Result<()> {
        self.subscribers.write().push(subscriber);
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            anyhow::bail!("server already started");
        }

        let opts = self.options();
        let handlers: Vec<Handler> = self.handlers.read().values().cloned().collect();
        let subscribers: Vec<Subscriber> = self.subscribers.read().clone();

        let router = Router::new(&handlers);
        let pipeline = compose_handler(BoxCloneService::new(router), &opts.handler_wrappers);
        let dispatcher = Arc::new(ServerDispatcher::new(opts.name.clone(), pipeline));

        let listener = opts.transport.listen(&opts.address, dispatcher).await?;
        let address = listener.addr().to_string();
        info!(server = %opts.name, transport = opts.transport.kind(), %address, "listening");

        if let Err(e) = opts.broker.connect().await {
            Self::rollback(&opts, listener.as_ref(), &[]).await;
            return Err(e);
        }

        let subscriptions = match Self::attach(&opts, &subscribers).await {
            Ok(subs) => subs,
            Err(e) => {
                Self::rollback(&opts, listener.as_ref(), &[]).await;
                if let Err(e) = opts.broker.disconnect().await {
                    warn!(server = %opts.name, error = %e, "broker disconnect failed");
                }
                return Err(e);
            }
        };

        let record = Self::record(&opts, &address, &handlers, &subscribers);
        let register_opts = RegisterOptions {
            ttl: Some(opts.register_ttl),
        };
        let registered = async {
            if let Some(check) = &opts.register_check {
                check().await?;
            }
            opts.registry.register(&record, register_opts)?;
            Ok::<_, anyhow::Error>(())
        }
        .await;
        if let Err(e) = registered {
            Self::rollback(&opts, listener.as_ref(), &subscriptions).await;
            if let Err(e) = opts.broker.disconnect().await {
                warn!(server = %opts.name, error = %e, "broker disconnect failed");
            }
            return Err(e);
        }
        info!(
            server = %opts.name,
            node = %opts.node_id(),
            registry = opts.registry.kind(),
            "registered"
        );

        let heartbeat = Heartbeat::start(
            opts.register_interval,
            Arc::clone(&opts.registry),
            record.clone(),
            register_opts,
            opts.register_check.clone(),
        );

        *self.bound.lock() = Some(address);
        *running = Some(Running {
            listener,
            subscriptions,
            heartbeat,
            record,
            broker: Arc::clone(&opts.broker),
            registry: Arc::clone(&opts.registry),
        });
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let Some(mut running) = self.running.lock().await.take() else {
            return Ok(());
        };
        let mut last: Option<anyhow::Error> = None;

        running.heartbeat.stop().await;

        if let Err(e) = running.registry.deregister(&running.record) {
            warn!(server = %running.record.name, error = %e, "deregister failed");
            last = Some(e.into());
        }
        for sub in &running.subscriptions {
            if let Err(e) = sub.unsubscribe().await {
                warn!(topic = sub.topic(), error = %e, "unsubscribe failed");
                last = Some(e);
            }
        }
        if let Err(e) = running.listener.close().await {
            warn!(error = %e, "listener close failed");
            last = Some(e);
        }
        if let Err(e) = running.broker.disconnect().await {
            warn!(error = %e, "broker disconnect failed");
            last = Some(e);
        }
        *self.bound.lock() = None;

        info!(server = %running.record.name, "stopped");
        last.map_or(Ok(()), Err)
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;
    use tower::layer::layer_fn;

    use super::*;
    use crate::broker::MemoryBroker;
    use crate::client::{CallOptions, Client, LocalClient, Publication, Request};
    use crate::error::CallError;
    use crate::registry::MemoryRegistry;
    use crate::server::wrapper::{HandlerService, InboundRequest};
    use crate::server::{subscriber_fn, HandlerOption, HandlerWrapper, RegisterCheck};
    use crate::transport::MemoryTransport;

    struct Stack {
        broker: Arc<MemoryBroker>,
        registry: Arc<MemoryRegistry>,
        transport: Arc<MemoryTransport>,
    }

    impl Stack {
        fn new() -> Self {
            Self {
                broker: Arc::new(MemoryBroker::new()),
                registry: Arc::new(MemoryRegistry::new()),
                transport: Arc::new(MemoryTransport::new()),
            }
        }

        fn server(&self) -> LocalServer {
            LocalServer::new(self.broker.clone(), self.registry.clone(), self.transport.clone())
        }

        fn client(&self) -> LocalClient {
            LocalClient::new(self.broker.clone(), self.registry.clone(), self.transport.clone())
        }
    }

    fn greeter() -> Handler {
        Handler::new("Greeter").endpoint("Hello", |_, body| async move {
            Ok(json!({ "greeting": format!("hello {}", body.as_str().unwrap_or("?")) }))
        })
    }

    #[tokio::test]
    async fn start_registers_and_serves_calls() {
        let stack = Stack::new();
        let server = stack.server();
        server
            .init(vec![ServerOption::Name("greeter".into())])
            .unwrap();
        server.handle(greeter()).unwrap();
        server.start().await.unwrap();

        let services = stack.registry.get_service("greeter").unwrap();
        assert_eq!(services[0].endpoints[0].name, "Greeter.Hello");
        assert_eq!(services[0].nodes[0].address, server.bound_address().unwrap());

        let resp = stack
            .client()
            .call(
                RequestContext::new(),
                Request::new("greeter", "Greeter.Hello", json!("ada")),
                CallOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(resp.body, json!({"greeting": "hello ada"}));

        server.stop().await.unwrap();
        assert!(stack.registry.get_service("greeter").is_err());
        assert!(!stack.broker.is_connected());
    }

    #[tokio::test]
    async fn internal_handlers_are_not_advertised() {
        let stack = Stack::new();
        let server = stack.server();
        server
            .init(vec![ServerOption::Name("svc".into())])
            .unwrap();
        server.handle(greeter()).unwrap();
        server
            .handle(
                server
                    .new_handler("Debug", vec![HandlerOption::Internal(true)])
                    .endpoint("Health", |_, _| async { Ok(json!("ok")) }),
            )
            .unwrap();
        server.start().await.unwrap();

        let names: Vec<_> = stack.registry.get_service("svc").unwrap()[0]
            .endpoints
            .iter()
            .map(|e| e.name.clone())
            .collect();
        assert_eq!(names, vec!["Greeter.Hello"]);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_handler_is_rejected() {
        let server = Stack::new().server();
        server.handle(greeter()).unwrap();
        assert!(server.handle(greeter()).is_err());
    }

    #[tokio::test]
    async fn subscribers_receive_published_messages() {
        let stack = Stack::new();
        let server = stack.server();
        let hits = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&hits);
        let sub = server.new_subscriber(
            "events",
            subscriber_fn(move |_, payload| {
                let counter = Arc::clone(&counter);
                async move {
                    assert_eq!(payload, json!({"n": 1}));
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
            Vec::new(),
        );
        server.subscribe(sub).unwrap();
        server.start().await.unwrap();

        stack
            .client()
            .publish(RequestContext::new(), Publication::new("events", json!({"n": 1})))
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn handler_wrappers_see_every_request() {
        let stack = Stack::new();
        let server = stack.server();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        let wrapper: Arc<dyn HandlerWrapper> = Arc::new(layer_fn(move |inner: HandlerService| {
            let log = Arc::clone(&log);
            service_fn(move |req: InboundRequest| {
                log.lock().push(req.endpoint.clone());
                inner.clone().oneshot(req)
            })
        }));
        server
            .init(vec![
                ServerOption::Name("greeter".into()),
                ServerOption::WrapHandler(vec![wrapper]),
            ])
            .unwrap();
        server.handle(greeter()).unwrap();
        server.start().await.unwrap();

        let client = stack.client();
        for endpoint in ["Greeter.Hello", "Greeter.Missing"] {
            let _ = client
                .call(
                    RequestContext::new(),
                    Request::new("greeter", endpoint, json!("x")),
                    CallOptions::default(),
                )
                .await;
        }
        assert_eq!(*seen.lock(), vec!["Greeter.Hello", "Greeter.Missing"]);

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn failed_register_check_aborts_start() {
        let stack = Stack::new();
        let server = stack.server();
        let check: RegisterCheck = Arc::new(|| -> BoxFuture<'static, anyhow::Result<()>> {
            Box::pin(async { Err(anyhow::anyhow!("not ready")) })
        });
        server
            .init(vec![
                ServerOption::Name("greeter".into()),
                ServerOption::Address("memory://greeter".into()),
                ServerOption::RegisterCheck(check),
            ])
            .unwrap();
        let func = subscriber_fn(|_ctx, _payload| async { Ok::<_, CallError>(()) });
        server
            .subscribe(server.new_subscriber("events", func, vec![]))
            .unwrap();

        assert!(server.start().await.is_err());
        assert!(server.bound_address().is_none());
        assert!(!stack.broker.is_connected());

        // The partial start released its listener address.
        let router = Router::new(std::iter::empty::<&Handler>());
        let dispatcher = Arc::new(ServerDispatcher::new("greeter", BoxCloneService::new(router)));
        let listener = stack.transport.listen("memory://greeter", dispatcher).await;
        assert!(listener.is_ok());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_start_twice_fails() {
        let server = Stack::new().server();
        server.start().await.unwrap();
        assert!(server.start().await.is_err());
        server.stop().await.unwrap();
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_endpoint_error_reaches_caller() {
        let stack = Stack::new();
        let server = stack.server();
        server.init(vec![ServerOption::Name("greeter".into())]).unwrap();
        server.start().await.unwrap();

        let err = stack
            .client()
            .call(
                RequestContext::new(),
                Request::new("greeter", "Greeter.Hello", Value::Null),
                CallOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::UnknownEndpoint { .. }));
        server.stop().await.unwrap();
    }
}
