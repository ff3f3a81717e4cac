//! Named implementations and the plugins that contribute them.
//!
//! The [`Catalog`] maps implementation names (as given to `--registry`,
//! `--broker`, `--transport`, `--store`) to constructors. Plugins named by
//! `--plugin` / `PLEXUS_PLUGIN` are resolved through a [`PluginLoader`] and
//! may add entries to the catalog before flags are applied.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use plexus_core::broker::{Broker, MemoryBroker};
use plexus_core::registry::{MemoryRegistry, Registry};
use plexus_core::store::{MemoryStore, Store};
use plexus_core::transport::{MemoryTransport, Transport};

/// Collaborator kinds that can be selected by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubsystemKind {
    Broker,
    Registry,
    Transport,
    Store,
}

impl SubsystemKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SubsystemKind::Broker => "broker",
            SubsystemKind::Registry => "registry",
            SubsystemKind::Transport => "transport",
            SubsystemKind::Store => "store",
        }
    }
}

impl fmt::Display for SubsystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

type Factory<T> = Arc<dyn Fn() -> Arc<T> + Send + Sync>;

struct Table<T: ?Sized> {
    factories: DashMap<String, Factory<T>>,
}

impl<T: ?Sized> Table<T> {
    fn new() -> Self {
        Self {
            factories: DashMap::new(),
        }
    }

    fn insert(&self, name: &str, factory: Factory<T>) {
        self.factories.insert(name.to_string(), factory);
    }

    fn build(&self, name: &str) -> Option<Arc<T>> {
        let factory = self.factories.get(name).map(|f| Arc::clone(f.value()))?;
        Some(factory())
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

/// Constructors for selectable collaborators. `"memory"` is always present.
pub struct Catalog {
    brokers: Table<dyn Broker>,
    registries: Table<dyn Registry>,
    transports: Table<dyn Transport>,
    stores: Table<dyn Store>,
}

impl Catalog {
    #[must_use]
    pub fn new() -> Self {
        let catalog = Self {
            brokers: Table::new(),
            registries: Table::new(),
            transports: Table::new(),
            stores: Table::new(),
        };
        catalog.register_broker("memory", || Arc::new(MemoryBroker::new()));
        catalog.register_registry("memory", || Arc::new(MemoryRegistry::new()));
        catalog.register_transport("memory", || Arc::new(MemoryTransport::new()));
        catalog.register_store("memory", || Arc::new(MemoryStore::new()));
        catalog
    }

    pub fn register_broker<F>(&self, name: &str, f: F)
    where
        F: Fn() -> Arc<dyn Broker> + Send + Sync + 'static,
    {
        self.brokers.insert(name, Arc::new(f));
    }

    pub fn register_registry<F>(&self, name: &str, f: F)
    where
        F: Fn() -> Arc<dyn Registry> + Send + Sync + 'static,
    {
        self.registries.insert(name, Arc::new(f));
    }

    pub fn register_transport<F>(&self, name: &str, f: F)
    where
        F: Fn() -> Arc<dyn Transport> + Send + Sync + 'static,
    {
        self.transports.insert(name, Arc::new(f));
    }

    pub fn register_store<F>(&self, name: &str, f: F)
    where
        F: Fn() -> Arc<dyn Store> + Send + Sync + 'static,
    {
        self.stores.insert(name, Arc::new(f));
    }

    #[must_use]
    pub fn broker(&self, name: &str) -> Option<Arc<dyn Broker>> {
        self.brokers.build(name)
    }

    #[must_use]
    pub fn registry(&self, name: &str) -> Option<Arc<dyn Registry>> {
        self.registries.build(name)
    }

    #[must_use]
    pub fn transport(&self, name: &str) -> Option<Arc<dyn Transport>> {
        self.transports.build(name)
    }

    #[must_use]
    pub fn store(&self, name: &str) -> Option<Arc<dyn Store>> {
        self.stores.build(name)
    }

    /// Registered implementation names for `kind`, sorted.
    #[must_use]
    pub fn names(&self, kind: SubsystemKind) -> Vec<String> {
        match kind {
            SubsystemKind::Broker => self.brokers.names(),
            SubsystemKind::Registry => self.registries.names(),
            SubsystemKind::Transport => self.transports.names(),
            SubsystemKind::Store => self.stores.names(),
        }
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Plugins
// ---------------------------------------------------------------------------

/// An extension loaded by name at first initialisation.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Registers whatever the plugin provides.
    ///
    /// # Errors
    ///
    /// Any error is fatal to service initialisation.
    fn init(&self, catalog: &Catalog) -> anyhow::Result<()>;
}

/// Resolves plugin names to plugins.
pub trait PluginLoader: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if no plugin is known by `name`.
    fn load(&self, name: &str) -> anyhow::Result<Arc<dyn Plugin>>;
}

/// Loader backed by plugins compiled into the binary.
#[derive(Default)]
pub struct PluginCatalog {
    plugins: DashMap<String, Arc<dyn Plugin>>,
}

impl PluginCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, plugin: Arc<dyn Plugin>) {
        self.plugins.insert(plugin.name().to_string(), plugin);
    }
}

impl PluginLoader for PluginCatalog {
    fn load(&self, name: &str) -> anyhow::Result<Arc<dyn Plugin>> {
        self.plugins
            .get(name)
            .map(|p| Arc::clone(p.value()))
            .ok_or_else(|| anyhow::anyhow!("plugin {name} not found"))
    }
}
