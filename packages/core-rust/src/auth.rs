//! Authentication contract. The default implementation carries a namespace
//! and an optional token but performs no verification.

use std::time::SystemTime;

use parking_lot::RwLock;

/// Default auth namespace.
pub const DEFAULT_NAMESPACE: &str = "plexus";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    pub expiry: SystemTime,
}

impl Token {
    #[must_use]
    pub fn expired(&self) -> bool {
        self.expiry <= SystemTime::now()
    }
}

#[derive(Debug, Clone)]
pub struct AuthOptions {
    pub namespace: String,
    /// Token attached to outbound calls, if any.
    pub token: Option<Token>,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            token: None,
        }
    }
}

#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum AuthOption {
    Namespace(String),
    ClientToken(Token),
}

pub trait Auth: Send + Sync {
    /// Applies options. Later options override earlier ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the configuration.
    fn init(&self, opts: Vec<AuthOption>) -> anyhow::Result<()>;

    fn options(&self) -> AuthOptions;

    fn kind(&self) -> &'static str;
}

pub struct NoopAuth {
    options: RwLock<AuthOptions>,
}

impl NoopAuth {
    #[must_use]
    pub fn new() -> Self {
        Self {
            options: RwLock::new(AuthOptions::default()),
        }
    }
}

impl Default for NoopAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl Auth for NoopAuth {
    fn init(&self, opts: Vec<AuthOption>) -> anyhow::Result<()> {
        let mut options = self.options.write();
        for opt in opts {
            match opt {
                AuthOption::Namespace(ns) => options.namespace = ns,
                AuthOption::ClientToken(t) => options.token = Some(t),
            }
        }
        Ok(())
    }

    fn options(&self) -> AuthOptions {
        self.options.read().clone()
    }

    fn kind(&self) -> &'static str {
        "noop"
    }
}
