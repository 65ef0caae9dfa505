// typeroute-messaging-core/src/bus.rs
use std::sync::Arc;

use async_trait::async_trait;

use crate::{MessagingError, OutboundMessage};

/// Broker publish seam. [`Route::Topic`](crate::Route::Topic) messages go to the
/// implementation's well-known exchange.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, message: OutboundMessage) -> Result<(), MessagingError>;
}

#[async_trait]
impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    async fn publish(&self, message: OutboundMessage) -> Result<(), MessagingError> {
        (**self).publish(message).await
    }
}
