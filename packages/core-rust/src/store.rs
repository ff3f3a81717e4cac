//! Key/value storage contract and an in-memory implementation.
//!
//! Keys are namespaced by `database` and `table`; a service names its table
//! after itself during first initialisation.

use std::collections::BTreeMap;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Database used when none is configured.
pub const DEFAULT_DATABASE: &str = "plexus";

/// Table used when none is configured.
pub const DEFAULT_TABLE: &str = "plexus";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub value: Vec<u8>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub nodes: Vec<String>,
    pub database: String,
    pub table: String,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            database: DEFAULT_DATABASE.to_string(),
            table: DEFAULT_TABLE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum StoreOption {
    Nodes(Vec<String>),
    Database(String),
    Table(String),
}

pub trait Store: Send + Sync {
    /// Applies options. Later options override earlier ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be prepared.
    fn init(&self, opts: Vec<StoreOption>) -> anyhow::Result<()>;

    fn options(&self) -> StoreOptions;

    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the key is absent.
    fn read(&self, key: &str) -> Result<Record, StoreError>;

    /// # Errors
    ///
    /// Returns an error if the record cannot be persisted.
    fn write(&self, record: Record) -> anyhow::Result<()>;

    /// # Errors
    ///
    /// Returns an error if the record cannot be removed.
    fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Keys in the current database/table, sorted.
    fn list(&self) -> Vec<String>;

    /// # Errors
    ///
    /// Returns an error if resources cannot be released.
    fn close(&self) -> anyhow::Result<()>;

    fn kind(&self) -> &'static str;
}

/// In-memory store keyed by `(database, table, key)`.
pub struct MemoryStore {
    options: RwLock<StoreOptions>,
    records: DashMap<(String, String, String), Record>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            options: RwLock::new(StoreOptions::default()),
            records: DashMap::new(),
        }
    }

    fn scoped(&self, key: &str) -> (String, String, String) {
        let opts = self.options.read();
        (opts.database.clone(), opts.table.clone(), key.to_string())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn init(&self, opts: Vec<StoreOption>) -> anyhow::Result<()> {
        let mut options = self.options.write();
        for opt in opts {
            match opt {
                StoreOption::Nodes(nodes) => options.nodes = nodes,
                StoreOption::Database(db) => options.database = db,
                StoreOption::Table(table) => options.table = table,
            }
        }
        Ok(())
    }

    fn options(&self) -> StoreOptions {
        self.options.read().clone()
    }

    fn read(&self, key: &str) -> Result<Record, StoreError> {
        self.records
            .get(&self.scoped(key))
            .map(|r| r.value().clone())
            .ok_or(StoreError::NotFound)
    }

    fn write(&self, record: Record) -> anyhow::Result<()> {
        let scoped = self.scoped(&record.key);
        self.records.insert(scoped, record);
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.records.remove(&self.scoped(key));
        Ok(())
    }

    fn list(&self) -> Vec<String> {
        let (db, table, _) = self.scoped("");
        let mut keys: Vec<String> = self
            .records
            .iter()
            .filter(|e| e.key().0 == db && e.key().1 == table)
            .map(|e| e.key().2.clone())
            .collect();
        keys.sort();
        keys
    }

    fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, value: &str) -> Record {
        Record {
            key: key.to_string(),
            value: value.as_bytes().to_vec(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn write_read_delete() {
        let store = MemoryStore::new();
        store.write(record("a", "1")).unwrap();
        assert_eq!(store.read("a").unwrap().value, b"1");

        store.delete("a").unwrap();
        assert!(matches!(store.read("a"), Err(StoreError::NotFound)));
    }

    #[test]
    fn tables_are_isolated() {
        let store = MemoryStore::new();
        store.init(vec![StoreOption::Table("orders".into())]).unwrap();
        store.write(record("k", "orders")).unwrap();

        store.init(vec![StoreOption::Table("users".into())]).unwrap();
        assert!(store.read("k").is_err());
        assert!(store.list().is_empty());

        store.init(vec![StoreOption::Table("orders".into())]).unwrap();
        assert_eq!(store.list(), vec!["k".to_string()]);
    }

    #[test]
    fn default_options_use_default_namespace() {
        let store = MemoryStore::new();
        assert_eq!(store.options().database, DEFAULT_DATABASE);
        assert_eq!(store.options().table, DEFAULT_TABLE);
    }
}
