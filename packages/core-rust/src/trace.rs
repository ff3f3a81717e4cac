//! Distributed tracing contract and an in-memory ring-buffer tracer.
//!
//! A [`Tracer`] starts a [`Span`] from a [`RequestContext`], returning a new
//! context whose trace headers point at the span so the next hop continues the
//! same trace. Finished spans are kept for introspection.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::metadata;

/// Which side of a call a span describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// Server side of a request.
    RequestInbound,
    /// Client side of a request.
    RequestOutbound,
}

/// A timed unit of work within a trace.
#[derive(Debug, Clone, Serialize)]
pub struct Span {
    pub name: String,
    pub id: String,
    pub trace_id: String,
    pub parent: Option<String>,
    pub started: SystemTime,
    pub duration: Duration,
    pub kind: SpanKind,
    pub metadata: BTreeMap<String, String>,
}

/// Tracing backend used by the trace wrappers.
pub trait Tracer: Send + Sync {
    /// Starts a span named `name` as a child of whatever span `ctx` carries.
    fn start(&self, ctx: &RequestContext, name: &str, kind: SpanKind) -> (RequestContext, Span);

    /// Records a finished span.
    fn finish(&self, span: Span);

    /// Returns finished spans, optionally limited to one trace.
    fn read(&self, trace_id: Option<&str>) -> Vec<Span>;
}

/// Keeps the most recent finished spans in memory.
pub struct MemoryTracer {
    capacity: usize,
    spans: Mutex<VecDeque<Span>>,
}

impl MemoryTracer {
    /// Creates a tracer that keeps at most `capacity` spans.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            spans: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }
}

impl Default for MemoryTracer {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Tracer for MemoryTracer {
    fn start(&self, ctx: &RequestContext, name: &str, kind: SpanKind) -> (RequestContext, Span) {
        let trace_id = ctx
            .trace_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let span = Span {
            name: name.to_string(),
            id: Uuid::new_v4().to_string(),
            trace_id: trace_id.clone(),
            parent: ctx.span_id.clone(),
            started: SystemTime::now(),
            duration: Duration::ZERO,
            kind,
            metadata: BTreeMap::new(),
        };

        let mut next = ctx.clone();
        next.trace_id = Some(trace_id.clone());
        next.span_id = Some(span.id.clone());
        next.metadata.set(metadata::TRACE_ID, trace_id);
        next.metadata.set(metadata::SPAN_ID, span.id.clone());

        (next, span)
    }

    fn finish(&self, mut span: Span) {
        span.duration = span.started.elapsed().unwrap_or_default();
        let mut spans = self.spans.lock();
        if self.capacity == 0 {
            return;
        }
        while spans.len() >= self.capacity {
            spans.pop_front();
        }
        spans.push_back(span);
    }

    fn read(&self, trace_id: Option<&str>) -> Vec<Span> {
        self.spans
            .lock()
            .iter()
            .filter(|s| trace_id.is_none_or(|t| s.trace_id == t))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_span_continues_trace() {
        let tracer = MemoryTracer::default();
        let (ctx, parent) = tracer.start(&RequestContext::new(), "a", SpanKind::RequestOutbound);
        let (child_ctx, child) = tracer.start(&ctx, "b", SpanKind::RequestInbound);

        assert_eq!(child.trace_id, parent.trace_id);
        assert_eq!(child.parent.as_deref(), Some(parent.id.as_str()));
        assert_eq!(child_ctx.metadata.get(metadata::SPAN_ID), Some(child.id.as_str()));
    }

    #[test]
    fn finish_keeps_most_recent_spans() {
        let tracer = MemoryTracer::new(2);
        for name in ["one", "two", "three"] {
            let (_, span) = tracer.start(&RequestContext::new(), name, SpanKind::RequestOutbound);
            tracer.finish(span);
        }
        let names: Vec<_> = tracer.read(None).into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["two", "three"]);
    }

    #[test]
    fn read_filters_by_trace() {
        let tracer = MemoryTracer::default();
        let (_, a) = tracer.start(&RequestContext::new(), "a", SpanKind::RequestOutbound);
        let (_, b) = tracer.start(&RequestContext::new(), "b", SpanKind::RequestOutbound);
        let trace = a.trace_id.clone();
        tracer.finish(a);
        tracer.finish(b);

        let spans = tracer.read(Some(&trace));
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "a");
    }
}
