//! HTTP introspection listener.
//!
//! Routes:
//! - `GET /health` -- status and lifecycle state
//! - `GET /health/live` -- liveness probe, always 200
//! - `GET /health/ready` -- 200 while running, 503 otherwise
//! - `GET /stats` -- request and error counters
//! - `GET /traces?id=` -- finished spans, optionally for one trace
//! - `GET /metrics` -- Prometheus text format, 404 without a recorder handle

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::header::HeaderName;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use plexus_core::trace::Span;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::{DebugState, Health, StatsReport, TraceQuery};
use crate::lifecycle::LifecycleState;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

async fn health_handler(State(state): State<DebugState>) -> Json<Health> {
    Json(state.health())
}

async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

async fn readiness_handler(State(state): State<DebugState>) -> StatusCode {
    if **state.lifecycle.load() == LifecycleState::Running {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn stats_handler(State(state): State<DebugState>) -> Json<StatsReport> {
    Json(state.stats())
}

async fn traces_handler(
    State(state): State<DebugState>,
    Query(query): Query<TraceQuery>,
) -> Json<Vec<Span>> {
    Json(state.traces(&query))
}

async fn metrics_handler(State(state): State<DebugState>) -> Result<String, StatusCode> {
    state
        .metrics
        .as_ref()
        .map(metrics_exporter_prometheus::PrometheusHandle::render)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Builds the introspection router with request-id and tracing middleware.
pub fn router(state: DebugState) -> Router {
    let x_request_id = HeaderName::from_static("x-request-id");

    let layers = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            REQUEST_TIMEOUT,
        ))
        .layer(PropagateRequestIdLayer::new(x_request_id));

    Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .route("/stats", get(stats_handler))
        .route("/traces", get(traces_handler))
        .route("/metrics", get(metrics_handler))
        .layer(layers)
        .with_state(state)
}

/// Binds `addr` and serves until `shutdown` is cancelled.
///
/// Returns the bound address, which differs from `addr` when port 0 is used.
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub async fn serve(
    addr: SocketAddr,
    state: DebugState,
    shutdown: CancellationToken,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    info!(address = %local, "debug listener bound");

    let app = router(state);
    let handle = tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = served {
            warn!(error = %e, "debug listener failed");
        }
    });
    Ok((local, handle))
}
