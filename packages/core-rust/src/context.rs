use crate::metadata::{self, Metadata};

/// Per-call context carrying outgoing/incoming headers and trace position.
/// Threaded through every client call, server handler, and subscriber.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Headers sent with (or received on) the call.
    pub metadata: Metadata,
    /// Trace identifier, if the call is part of a trace.
    pub trace_id: Option<String>,
    /// Span that is currently active for this call.
    pub span_id: Option<String>,
}

impl RequestContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a context from received headers, picking up the trace position
    /// propagated by the caller.
    #[must_use]
    pub fn from_metadata(metadata: Metadata) -> Self {
        let trace_id = metadata.get(metadata::TRACE_ID).map(str::to_string);
        let span_id = metadata.get(metadata::SPAN_ID).map(str::to_string);
        Self {
            metadata,
            trace_id,
            span_id,
        }
    }

    /// Returns a copy with `headers` merged in. Existing keys win unless
    /// `overwrite` is set.
    #[must_use]
    pub fn with_headers(mut self, headers: &Metadata, overwrite: bool) -> Self {
        self.metadata.merge(headers, overwrite);
        self
    }

    /// Returns a copy with a single header set, replacing any prior value.
    #[must_use]
    pub fn with_header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.set(key, value);
        self
    }
}
