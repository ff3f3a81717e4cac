//! Plexus Core: collaborator contracts, request metadata, and in-process defaults.

pub mod auth;
pub mod broker;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod metadata;
pub mod profile;
pub mod registry;
pub mod runtime;
pub mod server;
pub mod stats;
pub mod store;
pub mod trace;
pub mod transport;

pub use auth::{Auth, NoopAuth};
pub use broker::{Broker, MemoryBroker};
pub use client::{CallOptions, Client, LocalClient, Publication, Request, Response};
pub use config::{Config, MemoryConfig};
pub use context::RequestContext;
pub use error::CallError;
pub use metadata::Metadata;
pub use profile::{NoopProfile, Profile};
pub use registry::{MemoryRegistry, Registry};
pub use runtime::{LocalRuntime, Runtime};
pub use server::{Handler, LocalServer, Server, Subscriber};
pub use stats::{MemoryStats, Stats};
pub use store::{MemoryStore, Store};
pub use trace::{MemoryTracer, Tracer};
pub use transport::{MemoryTransport, Transport};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
