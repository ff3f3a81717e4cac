//! Service runtime manager contract and a bookkeeping-only local runtime.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A service managed by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeService {
    pub name: String,
    pub version: String,
    /// Location of the service source.
    pub source: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// Scheduler/namespace the runtime manages services in.
    pub namespace: String,
    pub source: String,
}

#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum RuntimeOption {
    Namespace(String),
    Source(String),
}

pub trait Runtime: Send + Sync {
    /// Applies options. Later options override earlier ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime rejects the configuration.
    fn init(&self, opts: Vec<RuntimeOption>) -> anyhow::Result<()>;

    fn options(&self) -> RuntimeOptions;

    /// # Errors
    ///
    /// Returns an error if a service with the same name and version exists.
    fn create(&self, service: RuntimeService) -> anyhow::Result<()>;

    /// Services matching `name`, or all services when `name` is `None`.
    fn read(&self, name: Option<&str>) -> Vec<RuntimeService>;

    /// # Errors
    ///
    /// Returns an error if the service cannot be removed.
    fn delete(&self, service: &RuntimeService) -> anyhow::Result<()>;

    /// # Errors
    ///
    /// Returns an error if the runtime cannot start.
    fn start(&self) -> anyhow::Result<()>;

    /// # Errors
    ///
    /// Returns an error if the runtime cannot stop cleanly.
    fn stop(&self) -> anyhow::Result<()>;

    fn kind(&self) -> &'static str;
}

/// Records created services without launching anything.
pub struct LocalRuntime {
    options: RwLock<RuntimeOptions>,
    running: AtomicBool,
    services: DashMap<(String, String), RuntimeService>,
}

impl LocalRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self {
            options: RwLock::new(RuntimeOptions::default()),
            running: AtomicBool::new(false),
            services: DashMap::new(),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for LocalRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime for LocalRuntime {
    fn init(&self, opts: Vec<RuntimeOption>) -> anyhow::Result<()> {
        let mut options = self.options.write();
        for opt in opts {
            match opt {
                RuntimeOption::Namespace(ns) => options.namespace = ns,
                RuntimeOption::Source(src) => options.source = src,
            }
        }
        Ok(())
    }

    fn options(&self) -> RuntimeOptions {
        self.options.read().clone()
    }

    fn create(&self, service: RuntimeService) -> anyhow::Result<()> {
        let key = (service.name.clone(), service.version.clone());
        if self.services.contains_key(&key) {
            anyhow::bail!("service {}@{} already exists", key.0, key.1);
        }
        self.services.insert(key, service);
        Ok(())
    }

    fn read(&self, name: Option<&str>) -> Vec<RuntimeService> {
        let mut out: Vec<RuntimeService> = self
            .services
            .iter()
            .filter(|e| name.is_none_or(|n| e.key().0 == n))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
        out
    }

    fn delete(&self, service: &RuntimeService) -> anyhow::Result<()> {
        self.services
            .remove(&(service.name.clone(), service.version.clone()));
        Ok(())
    }

    fn start(&self) -> anyhow::Result<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> anyhow::Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc(name: &str, version: &str) -> RuntimeService {
        RuntimeService {
            name: name.to_string(),
            version: version.to_string(),
            ..RuntimeService::default()
        }
    }

    #[test]
    fn create_rejects_duplicates() {
        let runtime = LocalRuntime::new();
        runtime.create(svc("greeter", "1")).unwrap();
        assert!(runtime.create(svc("greeter", "1")).is_err());
        runtime.create(svc("greeter", "2")).unwrap();
        assert_eq!(runtime.read(Some("greeter")).len(), 2);
    }

    #[test]
    fn delete_and_read_all() {
        let runtime = LocalRuntime::new();
        runtime.create(svc("a", "1")).unwrap();
        runtime.create(svc("b", "1")).unwrap();
        runtime.delete(&svc("a", "1")).unwrap();

        let names: Vec<_> = runtime.read(None).into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["b"]);
    }
}
