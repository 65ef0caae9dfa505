// typeroute-messaging-core/src/memory.rs
//! In-process [`Publisher`] for tests and local wiring.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::{InboundMessage, MessagingError, OutboundMessage, Publisher, Route};

/// Records every published message. Can be told to fail publishes.
#[derive(Debug, Default)]
pub struct InMemoryPublisher {
    published: Mutex<Vec<OutboundMessage>>,
    fail_with: Mutex<Option<String>>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent publishes fail with `MessagingError::Publish(reason)`.
    pub fn fail_publishes(&self, reason: impl Into<String>) {
        *lock(&self.fail_with) = Some(reason.into());
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        lock(&self.published).clone()
    }

    /// Drains recorded messages as the deliveries a consumer bound to every
    /// topic routing key would see.
    pub fn drain_inbound(&self) -> Vec<InboundMessage> {
        lock(&self.published)
            .drain(..)
            .map(InboundMessage::from)
            .collect()
    }
}

#[async_trait]
impl Publisher for InMemoryPublisher {
    async fn publish(&self, message: OutboundMessage) -> Result<(), MessagingError> {
        if let Some(reason) = lock(&self.fail_with).clone() {
            return Err(MessagingError::Publish(reason));
        }
        lock(&self.published).push(message);
        Ok(())
    }
}

impl From<OutboundMessage> for InboundMessage {
    fn from(message: OutboundMessage) -> Self {
        let routing_key = match message.route {
            Route::Topic(key) | Route::Reply(key) => key,
        };
        Self {
            message_type: message.message_type,
            body: message.body,
            routing_key,
            reply_to: None,
            correlation_id: message.correlation_id,
            message_id: Some(message.message_id.to_string()),
            redelivered: false,
        }
    }
}

// A poisoned lock only means another test thread panicked mid-push.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
