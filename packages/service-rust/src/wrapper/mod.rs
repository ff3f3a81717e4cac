//! Wrappers the service installs around its client and server.

pub mod client;
pub mod handler;

use std::sync::Arc;

use plexus_core::client::Client;
use plexus_core::trace::Tracer;

pub use client::{
    wrap_client, AuthClient, AuthSlot, ClientWrapper, FromServiceClient, NameSlot, TraceClient,
};
pub use handler::{StatsLayer, TraceHandlerLayer};

/// Installs the fixed client decorators. Auth is innermost, tracing outermost.
#[must_use]
pub fn decorate_client(
    client: Arc<dyn Client>,
    auth: AuthSlot,
    name: NameSlot,
    tracer: Arc<dyn Tracer>,
) -> Arc<dyn Client> {
    let client: Arc<dyn Client> = Arc::new(AuthClient::new(client, auth));
    let client: Arc<dyn Client> = Arc::new(FromServiceClient::new(client, name));
    Arc::new(TraceClient::new(client, tracer))
}
