//! Endpoint routing and the transport-facing dispatcher.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tower::{Service, ServiceExt};

use super::handler::{EndpointFn, Handler};
use super::wrapper::{HandlerService, InboundRequest};
use crate::client::Response;
use crate::context::RequestContext;
use crate::error::CallError;
use crate::metadata;
use crate::transport::{Dispatcher, TransportMessage};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Innermost handler service: looks up the endpoint by its full name.
#[derive(Clone, Default)]
pub struct Router {
    endpoints: Arc<BTreeMap<String, EndpointFn>>,
}

impl Router {
    #[must_use]
    pub fn new<'a>(handlers: impl IntoIterator<Item = &'a Handler>) -> Self {
        let mut endpoints = BTreeMap::new();
        for handler in handlers {
            for (name, f) in handler.endpoints() {
                endpoints.insert(name.to_string(), Arc::clone(f));
            }
        }
        Self {
            endpoints: Arc::new(endpoints),
        }
    }

    #[must_use]
    pub fn contains(&self, endpoint: &str) -> bool {
        self.endpoints.contains_key(endpoint)
    }
}

impl Service<InboundRequest> for Router {
    type Response = Response;
    type Error = CallError;
    type Future = Pin<Box<dyn Future<Output = Result<Response, CallError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: InboundRequest) -> Self::Future {
        match self.endpoints.get(&req.endpoint) {
            Some(f) => {
                let fut = f(req.ctx, req.body);
                Box::pin(async move { fut.await.map(Response::new) })
            }
            None => Box::pin(async move {
                Err(CallError::UnknownEndpoint {
                    endpoint: req.endpoint,
                })
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// ServerDispatcher
// ---------------------------------------------------------------------------

/// Decodes transport messages into [`InboundRequest`]s and feeds them
/// through the composed handler pipeline.
pub struct ServerDispatcher {
    service: String,
    pipeline: Mutex<HandlerService>,
}

impl ServerDispatcher {
    #[must_use]
    pub fn new(service: impl Into<String>, pipeline: HandlerService) -> Self {
        Self {
            service: service.into(),
            pipeline: Mutex::new(pipeline),
        }
    }
}

#[async_trait]
impl Dispatcher for ServerDispatcher {
    async fn dispatch(&self, msg: TransportMessage) -> Result<TransportMessage, CallError> {
        let endpoint = msg
            .header
            .get(metadata::ENDPOINT)
            .ok_or_else(|| CallError::BadRequest("missing endpoint header".to_string()))?
            .to_string();
        let service = msg
            .header
            .get(metadata::SERVICE)
            .map_or_else(|| self.service.clone(), str::to_string);
        let body = if msg.body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&msg.body)?
        };

        let req = InboundRequest {
            ctx: RequestContext::from_metadata(msg.header),
            service,
            endpoint,
            body,
        };
        let svc = self.pipeline.lock().clone();
        let resp = svc.oneshot(req).await?;

        Ok(TransportMessage {
            header: resp.header,
            body: serde_json::to_vec(&resp.body)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tower::util::BoxCloneService;

    use super::*;
    use crate::metadata::Metadata;

    fn router() -> Router {
        let greeter = Handler::new("Greeter").endpoint("Hello", |ctx, body| async move {
            let from = ctx.metadata.get("X-User").unwrap_or("anon").to_string();
            Ok(json!({ "echo": body, "from": from }))
        });
        Router::new([&greeter])
    }

    #[tokio::test]
    async fn routes_by_full_endpoint_name() {
        let router = router();
        assert!(router.contains("Greeter.Hello"));

        let resp = router
            .oneshot(InboundRequest {
                ctx: RequestContext::new().with_header("X-User", "ada"),
                service: "greeter".into(),
                endpoint: "Greeter.Hello".into(),
                body: json!(1),
            })
            .await
            .unwrap();
        assert_eq!(resp.body, json!({"echo": 1, "from": "ada"}));
    }

    #[tokio::test]
    async fn unknown_endpoint_is_an_error() {
        let err = router()
            .oneshot(InboundRequest {
                ctx: RequestContext::new(),
                service: "greeter".into(),
                endpoint: "Greeter.Missing".into(),
                body: Value::Null,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::UnknownEndpoint { endpoint } if endpoint == "Greeter.Missing"));
    }

    #[tokio::test]
    async fn dispatcher_decodes_headers_and_body() {
        let dispatcher = ServerDispatcher::new("greeter", BoxCloneService::new(router()));
        let header: Metadata = [(metadata::ENDPOINT, "Greeter.Hello"), ("X-User", "bob")]
            .into_iter()
            .collect();

        let reply = dispatcher
            .dispatch(TransportMessage {
                header,
                body: serde_json::to_vec(&json!("hi")).unwrap(),
            })
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(body, json!({"echo": "hi", "from": "bob"}));
    }

    #[tokio::test]
    async fn dispatcher_requires_endpoint_header() {
        let dispatcher = ServerDispatcher::new("greeter", BoxCloneService::new(router()));
        let err = dispatcher
            .dispatch(TransportMessage::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::BadRequest(_)));
    }
}
