// typeroute-messaging-core/src/sender.rs
use std::marker::PhantomData;

use tracing::debug;

use crate::{codec, MessageType, MessagingError, OutboundMessage, Payload, Publisher, Route};

/// The single outbound path: publishes a payload under its type's routing key.
pub struct MessageSender<M, P> {
    publisher: P,
    _marker: PhantomData<fn(M)>,
}

impl<M: MessageType, P: Publisher> MessageSender<M, P> {
    pub fn new(publisher: P) -> Self {
        Self {
            publisher,
            _marker: PhantomData,
        }
    }

    /// Encodes `payload` and publishes it with routing key and `type`
    /// property both set to `message_type`'s string form. No retry.
    pub async fn send(&self, message_type: M, payload: &Payload) -> Result<(), MessagingError> {
        let body = codec::encode(payload)?;
        let routing_key = message_type.as_str();
        let message = OutboundMessage::new(Route::Topic(routing_key.to_string()), body)
            .with_message_type(routing_key);
        let message_id = message.message_id;

        self.publisher.publish(message).await?;
        debug!(message_type = routing_key, %message_id, "message sent");
        Ok(())
    }
}
