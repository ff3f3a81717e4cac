//! Request/response transport contract and an in-process implementation.
//!
//! A listener binds a [`Dispatcher`] to an address; dialling the address
//! returns that dispatcher so clients can exchange [`TransportMessage`]s.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::CallError;
use crate::metadata::Metadata;

/// Prefix for addresses handed out by [`MemoryTransport`].
pub const MEMORY_SCHEME: &str = "memory://";

#[derive(Debug, Clone, Default)]
pub struct TransportMessage {
    pub header: Metadata,
    pub body: Vec<u8>,
}

/// Server side of a transport exchange.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Handles one request message and produces the reply.
    ///
    /// # Errors
    ///
    /// Returns the handler's `CallError` verbatim.
    async fn dispatch(&self, msg: TransportMessage) -> Result<TransportMessage, CallError>;
}

/// A bound listener. Closing it makes the address unreachable.
#[async_trait]
pub trait Listener: Send + Sync {
    fn addr(&self) -> &str;

    /// # Errors
    ///
    /// Returns an error if the listener cannot be released.
    async fn close(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    pub addrs: Vec<String>,
    pub timeout: Option<Duration>,
    pub secure: bool,
}

#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum TransportOption {
    Addrs(Vec<String>),
    Timeout(Duration),
    Secure(bool),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Applies options. Later options override earlier ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the configuration.
    fn init(&self, opts: Vec<TransportOption>) -> anyhow::Result<()>;

    fn options(&self) -> TransportOptions;

    /// Binds `dispatcher` to `addr`. Implementations may assign a concrete
    /// address when `addr` is a wildcard such as `":0"`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is already in use.
    async fn listen(
        &self,
        addr: &str,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> anyhow::Result<Box<dyn Listener>>;

    /// Resolves `addr` to the dispatcher listening there.
    ///
    /// # Errors
    ///
    /// Returns `CallError::Unreachable` if nothing is listening.
    async fn dial(&self, addr: &str) -> Result<Arc<dyn Dispatcher>, CallError>;

    fn kind(&self) -> &'static str;
}

type ListenerTable = DashMap<String, Arc<dyn Dispatcher>>;

/// In-process transport keyed by `memory://` addresses.
pub struct MemoryTransport {
    options: RwLock<TransportOptions>,
    listeners: Arc<ListenerTable>,
}

impl MemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            options: RwLock::new(TransportOptions::default()),
            listeners: Arc::new(DashMap::new()),
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn init(&self, opts: Vec<TransportOption>) -> anyhow::Result<()> {
        let mut options = self.options.write();
        for opt in opts {
            match opt {
                TransportOption::Addrs(addrs) => options.addrs = addrs,
                TransportOption::Timeout(t) => options.timeout = Some(t),
                TransportOption::Secure(s) => options.secure = s,
            }
        }
        Ok(())
    }

    fn options(&self) -> TransportOptions {
        self.options.read().clone()
    }

    async fn listen(
        &self,
        addr: &str,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> anyhow::Result<Box<dyn Listener>> {
        let addr = if addr.is_empty() || addr.ends_with(":0") {
            format!("{MEMORY_SCHEME}{}", Uuid::new_v4())
        } else {
            addr.to_string()
        };

        match self.listeners.entry(addr.clone()) {
            Entry::Occupied(_) => {
                anyhow::bail!("address already in use: {addr}");
            }
            Entry::Vacant(slot) => {
                slot.insert(dispatcher);
            }
        }

        Ok(Box::new(MemoryListener {
            addr,
            listeners: Arc::clone(&self.listeners),
        }))
    }

    async fn dial(&self, addr: &str) -> Result<Arc<dyn Dispatcher>, CallError> {
        self.listeners
            .get(addr)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CallError::Unreachable {
                address: addr.to_string(),
            })
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

struct MemoryListener {
    addr: String,
    listeners: Arc<ListenerTable>,
}

#[async_trait]
impl Listener for MemoryListener {
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.listeners.remove(&self.addr);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Dispatcher for Echo {
        async fn dispatch(&self, msg: TransportMessage) -> Result<TransportMessage, CallError> {
            Ok(msg)
        }
    }

    #[tokio::test]
    async fn wildcard_listen_assigns_memory_address() {
        let transport = MemoryTransport::new();
        let listener = transport.listen(":0", Arc::new(Echo)).await.unwrap();
        assert!(listener.addr().starts_with(MEMORY_SCHEME));
    }

    #[tokio::test]
    async fn dial_reaches_listener_until_closed() {
        let transport = MemoryTransport::new();
        let listener = transport.listen(":0", Arc::new(Echo)).await.unwrap();
        let addr = listener.addr().to_string();

        let dispatcher = transport.dial(&addr).await.unwrap();
        let reply = dispatcher
            .dispatch(TransportMessage {
                header: Metadata::new(),
                body: b"ping".to_vec(),
            })
            .await
            .unwrap();
        assert_eq!(reply.body, b"ping");

        listener.close().await.unwrap();
        assert!(matches!(
            transport.dial(&addr).await,
            Err(CallError::Unreachable { .. })
        ));
    }

    #[tokio::test]
    async fn duplicate_address_is_rejected() {
        let transport = MemoryTransport::new();
        let _first = transport.listen("memory://fixed", Arc::new(Echo)).await.unwrap();
        assert!(transport.listen("memory://fixed", Arc::new(Echo)).await.is_err());
    }
}
