//! Default collaborator instances.
//!
//! [`Defaults`] hands out one lazily constructed instance per collaborator
//! kind. Every service built from the same `Defaults` shares those instances
//! until an option replaces them. Tests create their own `Defaults`; the
//! process-wide instance behind [`Defaults::shared`] exists for
//! `Service::new`.

use std::sync::{Arc, OnceLock};

use plexus_core::auth::{Auth, AuthOption, NoopAuth};
use plexus_core::broker::{Broker, BrokerOption, MemoryBroker};
use plexus_core::client::{Client, ClientOption, LocalClient};
use plexus_core::config::{Config, MemoryConfig};
use plexus_core::profile::{NoopProfile, Profile};
use plexus_core::registry::{MemoryRegistry, Registry};
use plexus_core::runtime::{LocalRuntime, Runtime};
use plexus_core::server::{LocalServer, Server, ServerOption};
use plexus_core::stats::{MemoryStats, Stats};
use plexus_core::store::{MemoryStore, Store, StoreOption};
use plexus_core::trace::{MemoryTracer, Tracer};
use plexus_core::transport::{MemoryTransport, Transport};
use tracing::warn;

use crate::config::ServiceConfig;
use crate::plugin::Catalog;

/// Lazily constructed default collaborators.
pub struct Defaults {
    config: ServiceConfig,
    catalog: Catalog,
    client: OnceLock<Arc<dyn Client>>,
    server: OnceLock<Arc<dyn Server>>,
    broker: OnceLock<Arc<dyn Broker>>,
    registry: OnceLock<Arc<dyn Registry>>,
    transport: OnceLock<Arc<dyn Transport>>,
    store: OnceLock<Arc<dyn Store>>,
    runtime: OnceLock<Arc<dyn Runtime>>,
    auth: OnceLock<Arc<dyn Auth>>,
    settings: OnceLock<Arc<dyn Config>>,
    profile: OnceLock<Arc<dyn Profile>>,
    tracer: OnceLock<Arc<dyn Tracer>>,
    stats: OnceLock<Arc<dyn Stats>>,
}

impl Defaults {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ServiceConfig::default())
    }

    #[must_use]
    pub fn with_config(config: ServiceConfig) -> Self {
        Self {
            config,
            catalog: Catalog::new(),
            client: OnceLock::new(),
            server: OnceLock::new(),
            broker: OnceLock::new(),
            registry: OnceLock::new(),
            transport: OnceLock::new(),
            store: OnceLock::new(),
            runtime: OnceLock::new(),
            auth: OnceLock::new(),
            settings: OnceLock::new(),
            profile: OnceLock::new(),
            tracer: OnceLock::new(),
            stats: OnceLock::new(),
        }
    }

    /// Process-wide instance.
    #[must_use]
    pub fn shared() -> Arc<Defaults> {
        static SHARED: OnceLock<Arc<Defaults>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(Defaults::new())))
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Named implementations selectable from flags.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    // -----------------------------------------------------------------------
    // Transport-level collaborators
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn registry(&self) -> Arc<dyn Registry> {
        Arc::clone(
            self.registry
                .get_or_init(|| Arc::new(MemoryRegistry::new())),
        )
    }

    #[must_use]
    pub fn broker(&self) -> Arc<dyn Broker> {
        Arc::clone(self.broker.get_or_init(|| {
            let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
            if let Err(e) = broker.init(vec![BrokerOption::Registry(self.registry())]) {
                warn!(error = %e, "default broker rejected registry");
            }
            broker
        }))
    }

    #[must_use]
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(
            self.transport
                .get_or_init(|| Arc::new(MemoryTransport::new())),
        )
    }

    // -----------------------------------------------------------------------
    // Client / Server
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn client(&self) -> Arc<dyn Client> {
        Arc::clone(self.client.get_or_init(|| {
            let client: Arc<dyn Client> =
                Arc::new(LocalClient::new(self.broker(), self.registry(), self.transport()));
            if let Err(e) = client.init(vec![ClientOption::RequestTimeout(
                self.config.request_timeout,
            )]) {
                warn!(error = %e, "default client rejected request timeout");
            }
            client
        }))
    }

    #[must_use]
    pub fn server(&self) -> Arc<dyn Server> {
        Arc::clone(self.server.get_or_init(|| {
            let server: Arc<dyn Server> =
                Arc::new(LocalServer::new(self.broker(), self.registry(), self.transport()));
            if let Err(e) = server.init(vec![
                ServerOption::RegisterTtl(self.config.register_ttl),
                ServerOption::RegisterInterval(self.config.register_interval),
            ]) {
                warn!(error = %e, "default server rejected registration settings");
            }
            server
        }))
    }

    // -----------------------------------------------------------------------
    // Everything else
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(self.store.get_or_init(|| {
            let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
            if let Err(e) = store.init(vec![StoreOption::Database(
                self.config.store_database.clone(),
            )]) {
                warn!(error = %e, "default store rejected database");
            }
            store
        }))
    }

    #[must_use]
    pub fn runtime(&self) -> Arc<dyn Runtime> {
        Arc::clone(self.runtime.get_or_init(|| Arc::new(LocalRuntime::new())))
    }

    #[must_use]
    pub fn auth(&self) -> Arc<dyn Auth> {
        Arc::clone(self.auth.get_or_init(|| {
            let auth: Arc<dyn Auth> = Arc::new(NoopAuth::new());
            if let Err(e) = auth.init(vec![AuthOption::Namespace(
                self.config.auth_namespace.clone(),
            )]) {
                warn!(error = %e, "default auth rejected namespace");
            }
            auth
        }))
    }

    /// Default dynamic configuration source.
    #[must_use]
    pub fn settings(&self) -> Arc<dyn Config> {
        Arc::clone(self.settings.get_or_init(|| Arc::new(MemoryConfig::new())))
    }

    #[must_use]
    pub fn profile(&self) -> Arc<dyn Profile> {
        Arc::clone(self.profile.get_or_init(|| Arc::new(NoopProfile)))
    }

    #[must_use]
    pub fn tracer(&self) -> Arc<dyn Tracer> {
        Arc::clone(
            self.tracer
                .get_or_init(|| Arc::new(MemoryTracer::new(self.config.trace_capacity))),
        )
    }

    #[must_use]
    pub fn stats(&self) -> Arc<dyn Stats> {
        Arc::clone(self.stats.get_or_init(|| Arc::new(MemoryStats::new())))
    }
}

impl Default for Defaults {
    fn default() -> Self {
        Self::new()
    }
}
