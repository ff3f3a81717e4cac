//! Asynchronous messaging contract and an in-process implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::metadata::Metadata;
use crate::registry::Registry;

/// A message published to a topic.
#[derive(Debug, Clone, Default)]
pub struct BrokerMessage {
    pub header: Metadata,
    pub body: Vec<u8>,
}

/// Callback invoked for every message delivered on a subscription.
pub type BrokerHandler =
    Arc<dyn Fn(BrokerMessage) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct BrokerOptions {
    pub addrs: Vec<String>,
    /// Registry used by brokers that discover peers through service discovery.
    pub registry: Option<Arc<dyn Registry>>,
}

#[non_exhaustive]
pub enum BrokerOption {
    Addrs(Vec<String>),
    Registry(Arc<dyn Registry>),
}

#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Subscribers sharing a queue name split deliveries between them.
    pub queue: Option<String>,
}

/// Handle to an active subscription.
#[async_trait]
pub trait Subscription: Send + Sync {
    fn topic(&self) -> &str;

    /// Stops delivery to this subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker cannot remove the subscription.
    async fn unsubscribe(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Applies options. Later options override earlier ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the configuration.
    fn init(&self, opts: Vec<BrokerOption>) -> anyhow::Result<()>;

    fn options(&self) -> BrokerOptions;

    /// # Errors
    ///
    /// Returns an error if the broker cannot be reached.
    async fn connect(&self) -> anyhow::Result<()>;

    /// # Errors
    ///
    /// Returns an error if the connection cannot be closed cleanly.
    async fn disconnect(&self) -> anyhow::Result<()>;

    /// Delivers `msg` to the subscribers of `topic`.
    ///
    /// # Errors
    ///
    /// Returns the first subscriber error.
    async fn publish(&self, topic: &str, msg: BrokerMessage) -> anyhow::Result<()>;

    /// # Errors
    ///
    /// Returns an error if the subscription cannot be created.
    async fn subscribe(
        &self,
        topic: &str,
        handler: BrokerHandler,
        opts: SubscribeOptions,
    ) -> anyhow::Result<Box<dyn Subscription>>;

    fn kind(&self) -> &'static str;
}

struct Subscriber {
    id: String,
    queue: Option<String>,
    handler: BrokerHandler,
}

type TopicTable = DashMap<String, Vec<Subscriber>>;

/// In-process broker. Delivery is synchronous with `publish`; queue groups
/// receive each message once (first subscriber in the group).
pub struct MemoryBroker {
    options: RwLock<BrokerOptions>,
    connected: AtomicBool,
    topics: Arc<TopicTable>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            options: RwLock::new(BrokerOptions::default()),
            connected: AtomicBool::new(false),
            topics: Arc::new(DashMap::new()),
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn init(&self, opts: Vec<BrokerOption>) -> anyhow::Result<()> {
        let mut options = self.options.write();
        for opt in opts {
            match opt {
                BrokerOption::Addrs(addrs) => options.addrs = addrs,
                BrokerOption::Registry(r) => options.registry = Some(r),
            }
        }
        Ok(())
    }

    fn options(&self) -> BrokerOptions {
        self.options.read().clone()
    }

    async fn connect(&self) -> anyhow::Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, topic: &str, msg: BrokerMessage) -> anyhow::Result<()> {
        let handlers: Vec<BrokerHandler> = {
            let Some(subs) = self.topics.get(topic) else {
                return Ok(());
            };
            let mut seen_queues: Vec<&str> = Vec::new();
            let mut out = Vec::new();
            for sub in subs.iter() {
                if let Some(q) = sub.queue.as_deref() {
                    if seen_queues.contains(&q) {
                        continue;
                    }
                    seen_queues.push(q);
                }
                out.push(Arc::clone(&sub.handler));
            }
            out
        };

        for handler in handlers {
            handler(msg.clone()).await?;
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: BrokerHandler,
        opts: SubscribeOptions,
    ) -> anyhow::Result<Box<dyn Subscription>> {
        let id = Uuid::new_v4().to_string();
        self.topics
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber {
                id: id.clone(),
                queue: opts.queue,
                handler,
            });
        Ok(Box::new(MemorySubscription {
            id,
            topic: topic.to_string(),
            topics: Arc::clone(&self.topics),
        }))
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

struct MemorySubscription {
    id: String,
    topic: String,
    topics: Arc<TopicTable>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn unsubscribe(&self) -> anyhow::Result<()> {
        if let Some(mut subs) = self.topics.get_mut(&self.topic) {
            subs.retain(|s| s.id != self.id);
        }
        self.topics.remove_if(&self.topic, |_, subs| subs.is_empty());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;

    fn counting_handler(counter: Arc<AtomicU32>) -> BrokerHandler {
        Arc::new(move |_msg: BrokerMessage| -> BoxFuture<'static, anyhow::Result<()>> {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let broker = MemoryBroker::new();
        let count = Arc::new(AtomicU32::new(0));
        let _a = broker
            .subscribe("events", counting_handler(count.clone()), SubscribeOptions::default())
            .await
            .unwrap();
        let _b = broker
            .subscribe("events", counting_handler(count.clone()), SubscribeOptions::default())
            .await
            .unwrap();

        broker.publish("events", BrokerMessage::default()).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn queue_group_receives_once() {
        let broker = MemoryBroker::new();
        let count = Arc::new(AtomicU32::new(0));
        let queue = SubscribeOptions {
            queue: Some("workers".to_string()),
        };
        let _a = broker
            .subscribe("jobs", counting_handler(count.clone()), queue.clone())
            .await
            .unwrap();
        let _b = broker
            .subscribe("jobs", counting_handler(count.clone()), queue)
            .await
            .unwrap();

        broker.publish("jobs", BrokerMessage::default()).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let broker = MemoryBroker::new();
        let count = Arc::new(AtomicU32::new(0));
        let sub = broker
            .subscribe("events", counting_handler(count.clone()), SubscribeOptions::default())
            .await
            .unwrap();
        sub.unsubscribe().await.unwrap();

        broker.publish("events", BrokerMessage::default()).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn connect_and_disconnect_toggle_state() {
        let broker = MemoryBroker::new();
        broker.connect().await.unwrap();
        assert!(broker.is_connected());
        broker.disconnect().await.unwrap();
        assert!(!broker.is_connected());
    }
}
