//! Service discovery contract and an in-memory implementation.

use std::collections::BTreeMap;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// A named, versioned service and the nodes serving it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub version: String,
    pub metadata: BTreeMap<String, String>,
    pub endpoints: Vec<Endpoint>,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub address: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("service not found: {0}")]
    NotFound(String),
    #[error("service {0} has no nodes to register")]
    NoNodes(String),
}

#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    pub addrs: Vec<String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum RegistryOption {
    Addrs(Vec<String>),
    Timeout(Duration),
}

/// Options for a single registration.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterOptions {
    /// Nodes expire if not re-registered within this period. `None` never expires.
    pub ttl: Option<Duration>,
}

/// Service discovery backend.
pub trait Registry: Send + Sync {
    /// Applies options. Later options override earlier ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the configuration.
    fn init(&self, opts: Vec<RegistryOption>) -> anyhow::Result<()>;

    fn options(&self) -> RegistryOptions;

    /// Registers (or refreshes) the nodes of a service.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NoNodes` when `service.nodes` is empty.
    fn register(&self, service: &Service, opts: RegisterOptions) -> Result<(), RegistryError>;

    /// Removes the given nodes of a service.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` if the service is unknown.
    fn deregister(&self, service: &Service) -> Result<(), RegistryError>;

    /// Returns every live version of a service.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` if no live node serves `name`.
    fn get_service(&self, name: &str) -> Result<Vec<Service>, RegistryError>;

    fn list_services(&self) -> Vec<Service>;

    fn kind(&self) -> &'static str;
}

struct NodeRecord {
    node: Node,
    expires: Option<Instant>,
}

struct VersionRecord {
    service: Service,
    nodes: BTreeMap<String, NodeRecord>,
}

/// In-memory registry with per-node TTL expiry.
pub struct MemoryRegistry {
    options: RwLock<RegistryOptions>,
    /// name -> version -> record
    services: DashMap<String, BTreeMap<String, VersionRecord>>,
}

impl MemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            options: RwLock::new(RegistryOptions::default()),
            services: DashMap::new(),
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry for MemoryRegistry {
    fn init(&self, opts: Vec<RegistryOption>) -> anyhow::Result<()> {
        let mut options = self.options.write();
        for opt in opts {
            match opt {
                RegistryOption::Addrs(addrs) => options.addrs = addrs,
                RegistryOption::Timeout(t) => options.timeout = Some(t),
            }
        }
        Ok(())
    }

    fn options(&self) -> RegistryOptions {
        self.options.read().clone()
    }

    fn register(&self, service: &Service, opts: RegisterOptions) -> Result<(), RegistryError> {
        if service.nodes.is_empty() {
            return Err(RegistryError::NoNodes(service.name.clone()));
        }
        // A TTL past the end of the clock never expires.
        let expires = opts.ttl.and_then(|ttl| Instant::now().checked_add(ttl));

        let mut versions = self.services.entry(service.name.clone()).or_default();
        let record = versions
            .entry(service.version.clone())
            .or_insert_with(|| VersionRecord {
                service: service.clone(),
                nodes: BTreeMap::new(),
            });
        record.service.metadata.clone_from(&service.metadata);
        record.service.endpoints.clone_from(&service.endpoints);
        for node in &service.nodes {
            record.nodes.insert(
                node.id.clone(),
                NodeRecord {
                    node: node.clone(),
                    expires,
                },
            );
        }
        Ok(())
    }

    fn deregister(&self, service: &Service) -> Result<(), RegistryError> {
        let mut versions = self
            .services
            .get_mut(&service.name)
            .ok_or_else(|| RegistryError::NotFound(service.name.clone()))?;
        if let Some(record) = versions.get_mut(&service.version) {
            for node in &service.nodes {
                record.nodes.remove(&node.id);
            }
            if record.nodes.is_empty() {
                versions.remove(&service.version);
            }
        }
        let empty = versions.is_empty();
        drop(versions);
        if empty {
            self.services.remove(&service.name);
        }
        Ok(())
    }

    fn get_service(&self, name: &str) -> Result<Vec<Service>, RegistryError> {
        let now = Instant::now();
        let versions = self
            .services
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        let live: Vec<Service> = versions
            .values()
            .filter_map(|record| {
                let nodes: Vec<Node> = record
                    .nodes
                    .values()
                    .filter(|n| n.expires.is_none_or(|at| at > now))
                    .map(|n| n.node.clone())
                    .collect();
                if nodes.is_empty() {
                    return None;
                }
                let mut svc = record.service.clone();
                svc.nodes = nodes;
                Some(svc)
            })
            .collect();

        if live.is_empty() {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        Ok(live)
    }

    fn list_services(&self) -> Vec<Service> {
        let names: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        names
            .iter()
            .filter_map(|n| self.get_service(n).ok())
            .flatten()
            .map(|mut s| {
                s.nodes.clear();
                s.endpoints.clear();
                s
            })
            .collect()
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
