//! Background re-registration loop.
//!
//! Keeps the server's registry record alive by re-registering it every
//! `interval`, well inside the TTL. A failing register check deregisters the
//! node until the check passes again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::RegisterCheck;
use crate::registry::{RegisterOptions, Registry, Service};

pub(crate) struct Heartbeat {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Spawns the loop. A zero `interval`, or one past the end of the clock,
    /// disables re-registration.
    pub(crate) fn start(
        interval: Duration,
        registry: Arc<dyn Registry>,
        record: Service,
        opts: RegisterOptions,
        check: Option<RegisterCheck>,
    ) -> Self {
        if interval.is_zero() || tokio::time::Instant::now().checked_add(interval).is_none() {
            return Self {
                shutdown_tx: None,
                handle: None,
            };
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; registration already happened.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        beat(registry.as_ref(), &record, opts, check.as_ref()).await;
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Stops the loop and waits for it to exit.
    pub(crate) async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn beat(registry: &dyn Registry, record: &Service, opts: RegisterOptions, check: Option<&RegisterCheck>) {
    if let Some(check) = check {
        if let Err(e) = check().await {
            warn!(service = %record.name, error = %e, "register check failed, deregistering");
            if let Err(e) = registry.deregister(record) {
                debug!(service = %record.name, error = %e, "deregister after failed check");
            }
            return;
        }
    }
    match registry.register(record, opts) {
        Ok(()) => debug!(service = %record.name, "re-registered"),
        Err(e) => warn!(service = %record.name, error = %e, "re-register failed"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use futures_util::future::BoxFuture;

    use super::*;
    use crate::registry::{MemoryRegistry, Node};

    fn record() -> Service {
        Service {
            name: "greeter".into(),
            version: "latest".into(),
            metadata: BTreeMap::new(),
            endpoints: Vec::new(),
            nodes: vec![Node {
                id: "greeter-1".into(),
                address: "memory://a".into(),
                metadata: BTreeMap::new(),
            }],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_keeps_record_alive_past_ttl() {
        let registry = Arc::new(MemoryRegistry::new());
        let opts = RegisterOptions {
            ttl: Some(Duration::from_secs(3)),
        };
        registry.register(&record(), opts).unwrap();

        let mut hb = Heartbeat::start(
            Duration::from_secs(1),
            registry.clone(),
            record(),
            opts,
            None,
        );
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(registry.get_service("greeter").is_ok());
        hb.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failing_check_deregisters() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.register(&record(), RegisterOptions::default()).unwrap();

        let healthy = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&healthy);
        let check: RegisterCheck = Arc::new(move || -> BoxFuture<'static, anyhow::Result<()>> {
            let ok = flag.load(Ordering::SeqCst);
            Box::pin(async move {
                if ok {
                    Ok(())
                } else {
                    anyhow::bail!("unhealthy")
                }
            })
        });

        let mut hb = Heartbeat::start(
            Duration::from_secs(1),
            registry.clone(),
            record(),
            RegisterOptions::default(),
            Some(check),
        );
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(registry.get_service("greeter").is_err());

        healthy.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(registry.get_service("greeter").is_ok());
        hb.stop().await;
    }
}
