//! Dynamic configuration contract and an in-memory JSON tree implementation.

use parking_lot::RwLock;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    /// Names of the sources loaded so far, in load order.
    pub sources: Vec<String>,
}

#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ConfigOption {
    Source(String),
}

pub trait Config: Send + Sync {
    /// Applies options. Later options override earlier ones.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be registered.
    fn init(&self, opts: Vec<ConfigOption>) -> anyhow::Result<()>;

    fn options(&self) -> ConfigOptions;

    /// Deep-merges `values` over the current tree. Later loads win.
    ///
    /// # Errors
    ///
    /// Returns an error if `values` is not a JSON object.
    fn load(&self, source: &str, values: Value) -> anyhow::Result<()>;

    /// Value at `path`, or `None` if any segment is missing.
    fn get(&self, path: &[&str]) -> Option<Value>;

    /// The whole merged tree.
    fn snapshot(&self) -> Value;
}

pub struct MemoryConfig {
    options: RwLock<ConfigOptions>,
    tree: RwLock<Value>,
}

impl MemoryConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            options: RwLock::new(ConfigOptions::default()),
            tree: RwLock::new(Value::Object(Map::new())),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn merge(into: &mut Value, from: Value) {
    match (into, from) {
        (Value::Object(dst), Value::Object(src)) => {
            for (k, v) in src {
                merge(dst.entry(k).or_insert(Value::Null), v);
            }
        }
        (slot, v) => *slot = v,
    }
}

impl Config for MemoryConfig {
    fn init(&self, opts: Vec<ConfigOption>) -> anyhow::Result<()> {
        let mut options = self.options.write();
        for opt in opts {
            match opt {
                ConfigOption::Source(s) => options.sources.push(s),
            }
        }
        Ok(())
    }

    fn options(&self) -> ConfigOptions {
        self.options.read().clone()
    }

    fn load(&self, source: &str, values: Value) -> anyhow::Result<()> {
        if !values.is_object() {
            anyhow::bail!("config source {source} must be a JSON object");
        }
        merge(&mut self.tree.write(), values);
        self.options.write().sources.push(source.to_string());
        Ok(())
    }

    fn get(&self, path: &[&str]) -> Option<Value> {
        let tree = self.tree.read();
        let mut cur = &*tree;
        for segment in path {
            cur = cur.get(*segment)?;
        }
        Some(cur.clone())
    }

    fn snapshot(&self) -> Value {
        self.tree.read().clone()
    }
}
