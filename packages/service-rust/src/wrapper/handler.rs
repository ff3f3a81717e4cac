//! Server-side wrappers installed on every service: request statistics and
//! inbound tracing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use plexus_core::client::Response;
use plexus_core::error::CallError;
use plexus_core::server::InboundRequest;
use plexus_core::stats::{Outcome, Stats};
use plexus_core::trace::{SpanKind, Tracer};
use tower::{Layer, Service};
use tracing::{debug, info_span, Instrument};

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Response, CallError>> + Send>>;

/// Endpoints with this prefix belong to the internal debug handler.
const DEBUG_PREFIX: &str = "Debug.";

// ---------------------------------------------------------------------------
// StatsLayer
// ---------------------------------------------------------------------------

/// Records one [`Outcome`] per handled request.
#[derive(Clone)]
pub struct StatsLayer {
    stats: Arc<dyn Stats>,
}

impl StatsLayer {
    #[must_use]
    pub fn new(stats: Arc<dyn Stats>) -> Self {
        Self { stats }
    }
}

impl<S> Layer<S> for StatsLayer {
    type Service = StatsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        StatsService {
            inner,
            stats: Arc::clone(&self.stats),
        }
    }
}

#[derive(Clone)]
pub struct StatsService<S> {
    inner: S,
    stats: Arc<dyn Stats>,
}

/// Records on drop so that panics and dropped futures count as errors.
struct OutcomeGuard {
    stats: Arc<dyn Stats>,
    outcome: Outcome,
}

impl Drop for OutcomeGuard {
    fn drop(&mut self) {
        self.stats.record(self.outcome);
    }
}

impl<S> Service<InboundRequest> for StatsService<S>
where
    S: Service<InboundRequest, Response = Response, Error = CallError> + Send,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = CallError;
    type Future = HandlerFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: InboundRequest) -> Self::Future {
        let span = info_span!(
            "handler",
            endpoint = %req.endpoint,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        let mut guard = OutcomeGuard {
            stats: Arc::clone(&self.stats),
            outcome: Outcome::Error,
        };
        let endpoint = req.endpoint.clone();
        let fut = self.inner.call(req);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                if result.is_ok() {
                    guard.outcome = Outcome::Success;
                }

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;
                metrics::histogram!("plexus_handler_duration_seconds", "endpoint" => endpoint)
                    .record(start.elapsed().as_secs_f64());
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", guard.outcome.as_str());
                debug!(duration_ms, outcome = guard.outcome.as_str(), "request complete");

                drop(guard);
                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// TraceHandlerLayer
// ---------------------------------------------------------------------------

/// Opens an inbound span around each request, except debug endpoints.
#[derive(Clone)]
pub struct TraceHandlerLayer {
    tracer: Arc<dyn Tracer>,
}

impl TraceHandlerLayer {
    #[must_use]
    pub fn new(tracer: Arc<dyn Tracer>) -> Self {
        Self { tracer }
    }
}

impl<S> Layer<S> for TraceHandlerLayer {
    type Service = TraceHandlerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceHandlerService {
            inner,
            tracer: Arc::clone(&self.tracer),
        }
    }
}

#[derive(Clone)]
pub struct TraceHandlerService<S> {
    inner: S,
    tracer: Arc<dyn Tracer>,
}

impl<S> Service<InboundRequest> for TraceHandlerService<S>
where
    S: Service<InboundRequest, Response = Response, Error = CallError> + Send,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = CallError;
    type Future = HandlerFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: InboundRequest) -> Self::Future {
        if req.endpoint.starts_with(DEBUG_PREFIX) {
            return Box::pin(self.inner.call(req));
        }

        let name = format!("{}.{}", req.service, req.endpoint);
        let (ctx, mut span) = self.tracer.start(&req.ctx, &name, SpanKind::RequestInbound);
        req.ctx = ctx;
        let tracer = Arc::clone(&self.tracer);
        let fut = self.inner.call(req);

        Box::pin(async move {
            let result = fut.await;
            if let Err(e) = &result {
                span.metadata.insert("error".to_string(), e.to_string());
            }
            tracer.finish(span);
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use plexus_core::context::RequestContext;
    use plexus_core::server::HandlerService;
    use plexus_core::stats::MemoryStats;
    use plexus_core::trace::MemoryTracer;
    use serde_json::{json, Value};
    use tower::util::BoxCloneService;
    use tower::{service_fn, ServiceExt};

    use super::*;

    fn request(endpoint: &str) -> InboundRequest {
        InboundRequest {
            ctx: RequestContext::new(),
            service: "greeter".into(),
            endpoint: endpoint.into(),
            body: Value::Null,
        }
    }

    fn ok_service() -> HandlerService {
        BoxCloneService::new(service_fn(|req: InboundRequest| async move {
            if req.endpoint.ends_with("Fail") {
                Err(CallError::BadRequest("no".into()))
            } else {
                Ok(Response::new(json!({"trace": req.ctx.trace_id})))
            }
        }))
    }

    async fn explode(_req: InboundRequest) -> Result<Response, CallError> {
        panic!("handler blew up")
    }

    #[tokio::test]
    async fn stats_records_success_and_error() {
        let stats = Arc::new(MemoryStats::new());
        let svc = StatsLayer::new(stats.clone()).layer(ok_service());

        svc.clone().oneshot(request("Greeter.Hello")).await.unwrap();
        svc.oneshot(request("Greeter.Fail")).await.unwrap_err();

        let snap = stats.read();
        assert_eq!(snap.requests, 2);
        assert_eq!(snap.errors, 1);
    }

    #[tokio::test]
    async fn stats_counts_dropped_request_as_error() {
        let stats = Arc::new(MemoryStats::new());
        let mut svc = StatsLayer::new(stats.clone()).layer(ok_service());

        let fut = svc.call(request("Greeter.Hello"));
        drop(fut);

        let snap = stats.read();
        assert_eq!(snap.requests, 1);
        assert_eq!(snap.errors, 1);
    }

    #[tokio::test]
    async fn stats_counts_panic_as_error() {
        let stats = Arc::new(MemoryStats::new());
        let svc = StatsLayer::new(stats.clone()).layer(service_fn(explode));

        let joined = tokio::spawn(svc.oneshot(request("Greeter.Hello"))).await;
        assert!(joined.is_err());
        assert_eq!(stats.read().errors, 1);
    }

    #[tokio::test]
    async fn trace_records_span_and_error() {
        let tracer = Arc::new(MemoryTracer::new(16));
        let svc = TraceHandlerLayer::new(tracer.clone()).layer(ok_service());

        let resp = svc.clone().oneshot(request("Greeter.Hello")).await.unwrap();
        svc.oneshot(request("Greeter.Fail")).await.unwrap_err();

        let spans = tracer.read(None);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].name, "greeter.Greeter.Hello");
        assert_eq!(spans[0].kind, SpanKind::RequestInbound);
        assert_eq!(resp.body["trace"], json!(spans[0].trace_id));
        assert!(!spans[0].metadata.contains_key("error"));
        assert_eq!(spans[1].metadata["error"], "bad request: no");
    }

    #[tokio::test]
    async fn trace_skips_debug_endpoints() {
        let tracer = Arc::new(MemoryTracer::new(16));
        let svc = TraceHandlerLayer::new(tracer.clone()).layer(ok_service());

        svc.oneshot(request("Debug.Health")).await.unwrap();
        assert!(tracer.read(None).is_empty());
    }
}
