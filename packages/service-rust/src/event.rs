//! Topic publishing and handler/subscriber registration helpers.

use std::sync::Arc;

use plexus_core::client::{Client, Publication};
use plexus_core::context::RequestContext;
use plexus_core::error::CallError;
use plexus_core::server::{Handler, Server, Subscriber};
use serde::Serialize;

/// Publishes messages to one topic through a client.
#[derive(Clone)]
pub struct Event {
    topic: String,
    client: Arc<dyn Client>,
}

impl Event {
    #[must_use]
    pub fn new(topic: impl Into<String>, client: Arc<dyn Client>) -> Self {
        Self {
            topic: topic.into(),
            client,
        }
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// # Errors
    ///
    /// Returns `CallError::Codec` if `payload` cannot be encoded, or the
    /// client's publish error.
    pub async fn publish<T: Serialize>(
        &self,
        ctx: RequestContext,
        payload: &T,
    ) -> Result<(), CallError> {
        let payload = serde_json::to_value(payload)?;
        self.client
            .publish(ctx, Publication::new(self.topic.clone(), payload))
            .await
    }
}

/// Registers `handler` on `server`.
///
/// # Errors
///
/// Returns the server's error, e.g. for a duplicate handler name.
pub fn register_handler(server: &dyn Server, handler: Handler) -> anyhow::Result<()> {
    server.handle(handler)
}

/// Registers `subscriber` on `server`.
///
/// # Errors
///
/// Returns the server's error.
pub fn register_subscriber(server: &dyn Server, subscriber: Subscriber) -> anyhow::Result<()> {
    server.subscribe(subscriber)
}
