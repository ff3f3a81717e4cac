//! Call-path wrapping.
//!
//! The transport exchange behind `Client::call` is a boxed tower service.
//! Any `tower::Layer` over that service is a [`CallWrapper`]; wrappers are
//! composed so the first registered sees the request first and the response
//! last.

use std::sync::Arc;

use tower::util::BoxCloneService;
use tower::{Layer, Service};

use crate::client::{CallOptions, Request, Response};
use crate::context::RequestContext;
use crate::error::CallError;

/// One resolved call on its way to the transport.
#[derive(Debug, Clone)]
pub struct OutboundCall {
    pub ctx: RequestContext,
    /// Node address chosen for this call.
    pub address: String,
    pub request: Request,
    pub options: CallOptions,
}

pub type CallService = BoxCloneService<OutboundCall, Response, CallError>;

/// Wraps the client call path.
pub trait CallWrapper: Send + Sync {
    fn wrap(&self, inner: CallService) -> CallService;
}

impl<L> CallWrapper for L
where
    L: Layer<CallService> + Send + Sync,
    L::Service: Service<OutboundCall, Response = Response, Error = CallError> + Clone + Send + 'static,
    <L::Service as Service<OutboundCall>>::Future: Send + 'static,
{
    fn wrap(&self, inner: CallService) -> CallService {
        BoxCloneService::new(self.layer(inner))
    }
}

/// Wraps `base` so that `wrappers[0]` is outermost.
#[must_use]
pub fn compose_call(base: CallService, wrappers: &[Arc<dyn CallWrapper>]) -> CallService {
    wrappers.iter().rev().fold(base, |svc, w| w.wrap(svc))
}
