//! Server-side dispatch wrapping.
//!
//! Every handler endpoint is reached through one [`HandlerService`] and every
//! subscriber through a [`SubscriberService`]. Wrappers are tower layers over
//! those services, composed once when the server starts.
//!
//! Order: the first registered wrapper is outermost, so for `[w0, w1]` a
//! request passes `w0 -> w1 -> dispatch` and the reply `dispatch -> w1 -> w0`.

use std::sync::Arc;

use serde_json::Value;
use tower::util::BoxCloneService;
use tower::{Layer, Service};

use crate::client::Response;
use crate::context::RequestContext;
use crate::error::CallError;

/// A request that arrived for one of this server's endpoints.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub ctx: RequestContext,
    pub service: String,
    /// Full endpoint name, `"<Handler>.<Method>"`.
    pub endpoint: String,
    pub body: Value,
}

/// A broker message delivered to one of this server's subscribers.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub ctx: RequestContext,
    pub topic: String,
    pub payload: Value,
}

pub type HandlerService = BoxCloneService<InboundRequest, Response, CallError>;
pub type SubscriberService = BoxCloneService<InboundMessage, (), CallError>;

pub trait HandlerWrapper: Send + Sync {
    fn wrap(&self, inner: HandlerService) -> HandlerService;
}

impl<L> HandlerWrapper for L
where
    L: Layer<HandlerService> + Send + Sync,
    L::Service:
        Service<InboundRequest, Response = Response, Error = CallError> + Clone + Send + 'static,
    <L::Service as Service<InboundRequest>>::Future: Send + 'static,
{
    fn wrap(&self, inner: HandlerService) -> HandlerService {
        BoxCloneService::new(self.layer(inner))
    }
}

pub trait SubscriberWrapper: Send + Sync {
    fn wrap(&self, inner: SubscriberService) -> SubscriberService;
}

impl<L> SubscriberWrapper for L
where
    L: Layer<SubscriberService> + Send + Sync,
    L::Service: Service<InboundMessage, Response = (), Error = CallError> + Clone + Send + 'static,
    <L::Service as Service<InboundMessage>>::Future: Send + 'static,
{
    fn wrap(&self, inner: SubscriberService) -> SubscriberService {
        BoxCloneService::new(self.layer(inner))
    }
}

#[must_use]
pub fn compose_handler(base: HandlerService, wrappers: &[Arc<dyn HandlerWrapper>]) -> HandlerService {
    wrappers.iter().rev().fold(base, |svc, w| w.wrap(svc))
}

#[must_use]
pub fn compose_subscriber(
    base: SubscriberService,
    wrappers: &[Arc<dyn SubscriberWrapper>],
) -> SubscriberService {
    wrappers.iter().rev().fold(base, |svc, w| w.wrap(svc))
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use tower::layer::layer_fn;
    use tower::{service_fn, ServiceExt};

    use super::*;

    type Log = Arc<Mutex<Vec<String>>>;

    fn handler_tag(tag: &'static str, log: &Log) -> Arc<dyn HandlerWrapper> {
        let log = Arc::clone(log);
        Arc::new(layer_fn(move |inner: HandlerService| {
            let log = Arc::clone(&log);
            service_fn(move |req: InboundRequest| {
                let inner = inner.clone();
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(format!("{tag}>"));
                    let res = inner.oneshot(req).await;
                    log.lock().push(format!("<{tag}"));
                    res
                }
            })
        }))
    }

    fn subscriber_tag(tag: &'static str, log: &Log) -> Arc<dyn SubscriberWrapper> {
        let log = Arc::clone(log);
        Arc::new(layer_fn(move |inner: SubscriberService| {
            let log = Arc::clone(&log);
            service_fn(move |msg: InboundMessage| {
                let inner = inner.clone();
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(format!("{tag}>"));
                    let res = inner.oneshot(msg).await;
                    log.lock().push(format!("<{tag}"));
                    res
                }
            })
        }))
    }

    #[tokio::test]
    async fn handler_wrappers_first_is_outermost() {
        let log: Log = Arc::default();
        let sink = Arc::clone(&log);
        let base = BoxCloneService::new(service_fn(move |req: InboundRequest| {
            sink.lock().push("handler".to_string());
            async move { Ok::<_, CallError>(Response::new(req.body)) }
        }));

        let svc = compose_handler(
            base,
            &[handler_tag("w0", &log), handler_tag("w1", &log), handler_tag("w2", &log)],
        );
        svc.oneshot(InboundRequest {
            ctx: RequestContext::new(),
            service: "svc".into(),
            endpoint: "Svc.Echo".into(),
            body: Value::Null,
        })
        .await
        .unwrap();

        assert_eq!(
            *log.lock(),
            vec!["w0>", "w1>", "w2>", "handler", "<w2", "<w1", "<w0"]
        );
    }

    #[tokio::test]
    async fn subscriber_wrappers_first_is_outermost() {
        let log: Log = Arc::default();
        let sink = Arc::clone(&log);
        let base = BoxCloneService::new(service_fn(move |_msg: InboundMessage| {
            sink.lock().push("subscriber".to_string());
            async { Ok::<_, CallError>(()) }
        }));

        let svc = compose_subscriber(base, &[subscriber_tag("w0", &log), subscriber_tag("w1", &log)]);
        svc.oneshot(InboundMessage {
            ctx: RequestContext::new(),
            topic: "events".into(),
            payload: Value::Null,
        })
        .await
        .unwrap();

        assert_eq!(*log.lock(), vec!["w0>", "w1>", "subscriber", "<w1", "<w0"]);
    }
}
