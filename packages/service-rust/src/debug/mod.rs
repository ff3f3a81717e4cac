//! Service introspection: the internal `Debug` handler and an optional HTTP
//! listener serving the same data.

pub mod http;

use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwap;
use metrics_exporter_prometheus::PrometheusHandle;
use plexus_core::error::CallError;
use plexus_core::server::{Handler, HandlerOption};
use plexus_core::stats::Stats;
use plexus_core::trace::{Span, Tracer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::lifecycle::LifecycleState;

/// Name of the internal handler. Its endpoints are not advertised.
pub const HANDLER: &str = "Debug";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsReport {
    /// Unix seconds at which the stats sink was created.
    pub started: u64,
    pub uptime_secs: u64,
    pub requests: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraceQuery {
    /// Only spans of this trace. All spans if unset.
    #[serde(default)]
    pub id: Option<String>,
}

/// Everything the introspection surfaces read from.
#[derive(Clone)]
pub struct DebugState {
    pub stats: Arc<dyn Stats>,
    pub tracer: Arc<dyn Tracer>,
    pub lifecycle: Arc<ArcSwap<LifecycleState>>,
    pub metrics: Option<PrometheusHandle>,
}

impl DebugState {
    #[must_use]
    pub fn health(&self) -> Health {
        Health {
            status: "ok".to_string(),
            state: self.lifecycle.load().as_str().to_string(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> StatsReport {
        let snap = self.stats.read();
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        StatsReport {
            started: snap.started,
            uptime_secs: now.saturating_sub(snap.started),
            requests: snap.requests,
            errors: snap.errors,
        }
    }

    #[must_use]
    pub fn traces(&self, query: &TraceQuery) -> Vec<Span> {
        self.tracer.read(query.id.as_deref())
    }
}

/// Internal handler exposing `Debug.Health`, `Debug.Stats` and `Debug.Trace`.
#[must_use]
pub fn handler(state: &DebugState) -> Handler {
    let health = state.clone();
    let stats = state.clone();
    let traces = state.clone();

    Handler::new(HANDLER)
        .with_options(vec![HandlerOption::Internal(true)])
        .typed("Health", move |_ctx, _req: Value| {
            let report = health.health();
            async move { Ok::<_, CallError>(report) }
        })
        .typed("Stats", move |_ctx, _req: Value| {
            let report = stats.stats();
            async move { Ok::<_, CallError>(report) }
        })
        .typed("Trace", move |_ctx, req: Option<TraceQuery>| {
            let spans = traces.traces(&req.unwrap_or_default());
            async move { Ok::<_, CallError>(spans) }
        })
}
