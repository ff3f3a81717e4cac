//! In-process client: registry lookup, first node, JSON over the transport.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tower::util::BoxCloneService;
use tower::{Service, ServiceExt};
use tracing::debug;

use super::wrapper::{compose_call, CallService, OutboundCall};
use super::{
    CallOptions, CallStream, Client, ClientOption, ClientOptions, Publication, Request, Response,
};
use crate::broker::{Broker, BrokerMessage};
use crate::context::RequestContext;
use crate::error::CallError;
use crate::metadata;
use crate::registry::Registry;
use crate::transport::{Transport, TransportMessage};

// ---------------------------------------------------------------------------
// TransportCall (innermost call service)
// ---------------------------------------------------------------------------

/// Sends one [`OutboundCall`] over the transport with a deadline.
#[derive(Clone)]
struct TransportCall {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl Service<OutboundCall> for TransportCall {
    type Response = Response;
    type Error = CallError;
    type Future = Pin<Box<dyn Future<Output = Result<Response, CallError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: OutboundCall) -> Self::Future {
        let transport = Arc::clone(&self.transport);
        let timeout = call.options.request_timeout.unwrap_or(self.timeout);

        Box::pin(async move {
            match tokio::time::timeout(timeout, exchange(transport, call)).await {
                Ok(res) => res,
                Err(_) => Err(CallError::Timeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            }
        })
    }
}

async fn exchange(transport: Arc<dyn Transport>, call: OutboundCall) -> Result<Response, CallError> {
    let dispatcher = transport.dial(&call.address).await?;

    let mut header = call.ctx.metadata;
    header.set(metadata::SERVICE, call.request.service);
    header.set(metadata::ENDPOINT, call.request.endpoint);
    header.set(metadata::CONTENT_TYPE, call.request.content_type);

    let reply = dispatcher
        .dispatch(TransportMessage {
            header,
            body: serde_json::to_vec(&call.request.body)?,
        })
        .await?;

    let body = if reply.body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&reply.body)?
    };
    Ok(Response {
        body,
        header: reply.header,
    })
}

fn build_pipeline(opts: &ClientOptions) -> CallService {
    let base = BoxCloneService::new(TransportCall {
        transport: Arc::clone(&opts.transport),
        timeout: opts.request_timeout,
    });
    compose_call(base, &opts.call_wrappers)
}

/// Picks the address of the first node of the first matching service.
fn resolve(registry: &dyn Registry, service: &str) -> Result<String, CallError> {
    let not_found = || CallError::ServiceNotFound {
        service: service.to_string(),
    };
    let services = registry.get_service(service).map_err(|_| not_found())?;
    services
        .iter()
        .flat_map(|s| s.nodes.iter())
        .map(|n| n.address.clone())
        .next()
        .ok_or_else(not_found)
}

// ---------------------------------------------------------------------------
// LocalClient
// ---------------------------------------------------------------------------

pub struct LocalClient {
    options: RwLock<ClientOptions>,
    /// Rebuilt whenever options change.
    pipeline: Mutex<CallService>,
}

impl LocalClient {
    #[must_use]
    pub fn new(
        broker: Arc<dyn Broker>,
        registry: Arc<dyn Registry>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let options = ClientOptions::new(broker, registry, transport);
        let pipeline = build_pipeline(&options);
        Self {
            options: RwLock::new(options),
            pipeline: Mutex::new(pipeline),
        }
    }

    fn prepare(
        &self,
        ctx: RequestContext,
        req: Request,
        opts: CallOptions,
    ) -> Result<(OutboundCall, CallService), CallError> {
        let address = match &opts.address {
            Some(addr) => addr.clone(),
            None => resolve(self.options.read().registry.as_ref(), &req.service)?,
        };
        debug!(service = %req.service, endpoint = %req.endpoint, %address, "client call");
        let call = OutboundCall {
            ctx,
            address,
            request: req,
            options: opts,
        };
        Ok((call, self.pipeline.lock().clone()))
    }
}

#[async_trait]
impl Client for LocalClient {
    fn init(&self, opts: Vec<ClientOption>) -> anyhow::Result<()> {
        let mut options = self.options.write();
        options.apply(opts);
        *self.pipeline.lock() = build_pipeline(&options);
        Ok(())
    }

    fn options(&self) -> ClientOptions {
        self.options.read().clone()
    }

    async fn call(
        &self,
        ctx: RequestContext,
        req: Request,
        opts: CallOptions,
    ) -> Result<Response, CallError> {
        let (call, svc) = self.prepare(ctx, req, opts)?;
        svc.oneshot(call).await
    }

    async fn stream(
        &self,
        ctx: RequestContext,
        req: Request,
        opts: CallOptions,
    ) -> Result<Box<dyn CallStream>, CallError> {
        let (call, svc) = self.prepare(ctx, req, opts)?;
        Ok(Box::new(LocalStream {
            call,
            svc,
            replies: VecDeque::new(),
            closed: false,
        }))
    }

    async fn publish(&self, ctx: RequestContext, msg: Publication) -> Result<(), CallError> {
        let broker = Arc::clone(&self.options.read().broker);

        let mut header = ctx.metadata;
        header.set(metadata::TOPIC, msg.topic.clone());
        header.set(metadata::CONTENT_TYPE, msg.content_type);

        let body = serde_json::to_vec(&msg.payload)?;
        broker
            .publish(&msg.topic, BrokerMessage { header, body })
            .await
            .map_err(CallError::Internal)
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}

// ---------------------------------------------------------------------------
// LocalStream
// ---------------------------------------------------------------------------

/// Request/reply pseudo-stream: every `send` performs one call to the
/// endpoint and queues its reply for `recv`.
struct LocalStream {
    call: OutboundCall,
    svc: CallService,
    replies: VecDeque<Value>,
    closed: bool,
}

#[async_trait]
impl CallStream for LocalStream {
    fn context(&self) -> &RequestContext {
        &self.call.ctx
    }

    fn request(&self) -> &Request {
        &self.call.request
    }

    async fn send(&mut self, body: Value) -> Result<(), CallError> {
        if self.closed {
            return Err(CallError::BadRequest("stream is closed".to_string()));
        }
        let mut call = self.call.clone();
        call.request.body = body;
        let resp = self.svc.clone().oneshot(call).await?;
        self.replies.push_back(resp.body);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Value>, CallError> {
        Ok(self.replies.pop_front())
    }

    async fn close(&mut self) -> Result<(), CallError> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use futures_util::future::BoxFuture;
    use serde_json::json;
    use tower::layer::layer_fn;
    use tower::service_fn;

    use super::*;
    use crate::broker::{BrokerHandler, MemoryBroker, SubscribeOptions};
    use crate::client::CallWrapper;
    use crate::registry::{MemoryRegistry, Node, RegisterOptions, Service as Registered};
    use crate::transport::{Dispatcher, Listener, MemoryTransport};

    /// Echoes the request body, tagging the reply with the endpoint header.
    struct Echo;

    #[async_trait]
    impl Dispatcher for Echo {
        async fn dispatch(&self, msg: TransportMessage) -> Result<TransportMessage, CallError> {
            let mut header = crate::metadata::Metadata::new();
            if let Some(ep) = msg.header.get(metadata::ENDPOINT) {
                header.set("X-Endpoint", ep);
            }
            Ok(TransportMessage {
                header,
                body: msg.body,
            })
        }
    }

    struct Slow;

    #[async_trait]
    impl Dispatcher for Slow {
        async fn dispatch(&self, msg: TransportMessage) -> Result<TransportMessage, CallError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(msg)
        }
    }

    async fn setup(dispatcher: Arc<dyn Dispatcher>) -> (LocalClient, Box<dyn Listener>) {
        let registry = Arc::new(MemoryRegistry::new());
        let transport = Arc::new(MemoryTransport::new());
        let listener = transport.listen(":0", dispatcher).await.unwrap();

        registry
            .register(
                &Registered {
                    name: "greeter".into(),
                    version: "latest".into(),
                    metadata: BTreeMap::new(),
                    endpoints: Vec::new(),
                    nodes: vec![Node {
                        id: "n1".into(),
                        address: listener.addr().to_string(),
                        metadata: BTreeMap::new(),
                    }],
                },
                RegisterOptions::default(),
            )
            .unwrap();

        let client = LocalClient::new(Arc::new(MemoryBroker::new()), registry, transport);
        (client, listener)
    }

    #[tokio::test]
    async fn call_resolves_and_round_trips() {
        let (client, _listener) = setup(Arc::new(Echo)).await;
        let resp = client
            .call(
                RequestContext::new(),
                Request::new("greeter", "Greeter.Hello", json!({"name": "a"})),
                CallOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(resp.body, json!({"name": "a"}));
        assert_eq!(resp.header.get("X-Endpoint"), Some("Greeter.Hello"));
    }

    #[tokio::test]
    async fn unknown_service_is_not_found() {
        let (client, _listener) = setup(Arc::new(Echo)).await;
        let err = client
            .call(
                RequestContext::new(),
                Request::new("nope", "Nope.Call", Value::Null),
                CallOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::ServiceNotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_endpoint_times_out() {
        let (client, _listener) = setup(Arc::new(Slow)).await;
        let err = client
            .call(
                RequestContext::new(),
                Request::new("greeter", "Greeter.Hello", Value::Null),
                CallOptions {
                    request_timeout: Some(Duration::from_millis(50)),
                    ..CallOptions::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Timeout { timeout_ms: 50 }));
    }

    #[tokio::test]
    async fn wrap_call_option_rebuilds_pipeline() {
        let (client, _listener) = setup(Arc::new(Echo)).await;
        let hits = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&hits);
        let wrapper: Arc<dyn CallWrapper> = Arc::new(layer_fn(move |inner: CallService| {
            let counter = Arc::clone(&counter);
            service_fn(move |call: OutboundCall| {
                counter.fetch_add(1, Ordering::SeqCst);
                inner.clone().oneshot(call)
            })
        }));
        client.init(vec![ClientOption::WrapCall(vec![wrapper])]).unwrap();

        client
            .call(
                RequestContext::new(),
                Request::new("greeter", "Greeter.Hello", Value::Null),
                CallOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stream_queues_one_reply_per_send() {
        let (client, _listener) = setup(Arc::new(Echo)).await;
        let mut stream = client
            .stream(
                RequestContext::new(),
                Request::new("greeter", "Greeter.Stream", Value::Null),
                CallOptions::default(),
            )
            .await
            .unwrap();

        stream.send(json!(1)).await.unwrap();
        stream.send(json!(2)).await.unwrap();
        assert_eq!(stream.recv().await.unwrap(), Some(json!(1)));
        assert_eq!(stream.recv().await.unwrap(), Some(json!(2)));
        assert_eq!(stream.recv().await.unwrap(), None);

        stream.close().await.unwrap();
        assert!(stream.send(json!(3)).await.is_err());
    }

    #[tokio::test]
    async fn publish_goes_through_broker() {
        let broker = Arc::new(MemoryBroker::new());
        let client = LocalClient::new(
            broker.clone(),
            Arc::new(MemoryRegistry::new()),
            Arc::new(MemoryTransport::new()),
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: BrokerHandler = Arc::new(move |msg: BrokerMessage| -> BoxFuture<'static, anyhow::Result<()>> {
            sink.lock().push(msg);
            Box::pin(async { Ok(()) })
        });
        let _sub = broker
            .subscribe("events", handler, SubscribeOptions::default())
            .await
            .unwrap();

        client
            .publish(RequestContext::new(), Publication::new("events", json!({"k": 1})))
            .await
            .unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].header.get(metadata::TOPIC), Some("events"));
        assert_eq!(serde_json::from_slice::<Value>(&seen[0].body).unwrap(), json!({"k": 1}));
    }
}
