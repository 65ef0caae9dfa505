use lapin::{message::Delivery, BasicProperties};
use typeroute_messaging_core::{DispatchOutcome, InboundMessage, MessagingError, OutboundMessage, Route};

const PERSISTENT: u8 = 2;

/// How a delivery is settled once dispatch has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// nack with requeue
    Requeue,
    /// nack without requeue; the broker dead-letters it if the queue is set up for that
    Reject,
}

/// I/O failures get one redelivery. Everything else, including malformed
/// messages, is rejected so it cannot loop.
pub fn disposition(result: &Result<DispatchOutcome, MessagingError>, redelivered: bool) -> Disposition {
    match result {
        Ok(_) => Disposition::Ack,
        Err(err) if err.is_io() && !redelivered => Disposition::Requeue,
        Err(_) => Disposition::Reject,
    }
}

pub(crate) fn inbound_from_delivery(delivery: &Delivery) -> InboundMessage {
    inbound_from_parts(
        &delivery.properties,
        delivery.data.clone(),
        delivery.routing_key.as_str(),
        delivery.redelivered,
    )
}

/// The dispatcher resolves handlers from the `type` property, not the routing key.
pub(crate) fn inbound_from_parts(
    props: &BasicProperties,
    body: Vec<u8>,
    routing_key: &str,
    redelivered: bool,
) -> InboundMessage {
    InboundMessage {
        message_type: props.kind().as_ref().map(|t| t.to_string()),
        body,
        routing_key: routing_key.to_string(),
        reply_to: props.reply_to().as_ref().map(|r| r.to_string()),
        correlation_id: props.correlation_id().as_ref().map(|c| c.to_string()),
        message_id: props.message_id().as_ref().map(|m| m.to_string()),
        redelivered,
    }
}

/// Exchange and routing key for `message`. Replies go through the default
/// exchange straight to the reply queue.
pub(crate) fn publish_target<'a>(message: &'a OutboundMessage, exchange: &'a str) -> (&'a str, &'a str) {
    match &message.route {
        Route::Topic(key) => (exchange, key.as_str()),
        Route::Reply(queue) => ("", queue.as_str()),
    }
}

pub(crate) fn publish_properties(message: &OutboundMessage) -> BasicProperties {
    let mut props = BasicProperties::default()
        .with_content_type(OutboundMessage::CONTENT_TYPE.into())
        .with_message_id(message.message_id.to_string().into())
        .with_timestamp(u64::try_from(message.timestamp.timestamp()).unwrap_or_default())
        .with_delivery_mode(PERSISTENT);
    if let Some(message_type) = &message.message_type {
        props = props.with_type(message_type.clone().into());
    }
    if let Some(correlation_id) = &message.correlation_id {
        props = props.with_correlation_id(correlation_id.clone().into());
    }
    props
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use typeroute_messaging_core::HandlerError;

    fn listener_failure() -> MessagingError {
        MessagingError::ListenerFailed {
            handler: "Invoices".into(),
            operation: "handle".into(),
            source: HandlerError::msg("boom"),
        }
    }

    fn io_failure() -> MessagingError {
        MessagingError::BrokerIo {
            handler: "Invoices".into(),
            operation: "handle".into(),
            source: io::Error::new(io::ErrorKind::ConnectionAborted, "gone"),
        }
    }

    fn text(value: &Option<lapin::types::ShortString>) -> Option<&str> {
        value.as_ref().map(|s| s.as_str())
    }

    #[test]
    fn successful_and_unhandled_messages_are_acked() {
        let ok = Ok(DispatchOutcome::Dispatched { handlers: 1, results: 0 });
        assert_eq!(disposition(&ok, false), Disposition::Ack);
        assert_eq!(disposition(&Ok(DispatchOutcome::Unhandled), false), Disposition::Ack);
    }

    #[test]
    fn io_failures_are_requeued_once() {
        assert_eq!(disposition(&Err(io_failure()), false), Disposition::Requeue);
        assert_eq!(disposition(&Err(io_failure()), true), Disposition::Reject);
    }

    #[test]
    fn other_failures_are_rejected() {
        assert_eq!(disposition(&Err(listener_failure()), false), Disposition::Reject);
        assert_eq!(
            disposition(&Err(MessagingError::UnknownMessageType("x".into())), false),
            Disposition::Reject
        );
        assert_eq!(disposition(&Err(MessagingError::MissingMessageType), false), Disposition::Reject);
    }

    #[test]
    fn inbound_reads_type_and_reply_metadata() {
        let props = BasicProperties::default()
            .with_type("billing.invoice.created".into())
            .with_reply_to("billing.replies".into())
            .with_correlation_id("corr-7".into())
            .with_message_id("m-1".into());

        let msg = inbound_from_parts(&props, br#"{"a":"b"}"#.to_vec(), "billing.#", true);
        assert_eq!(msg.message_type.as_deref(), Some("billing.invoice.created"));
        assert_eq!(msg.routing_key, "billing.#");
        assert_eq!(msg.reply_to.as_deref(), Some("billing.replies"));
        assert_eq!(msg.correlation_id.as_deref(), Some("corr-7"));
        assert_eq!(msg.message_id.as_deref(), Some("m-1"));
        assert_eq!(msg.body, br#"{"a":"b"}"#.to_vec());
        assert!(msg.redelivered);
    }

    #[test]
    fn inbound_without_type_property_has_no_type() {
        let msg = inbound_from_parts(&BasicProperties::default(), Vec::new(), "billing.x", false);
        assert_eq!(msg.message_type, None);
        assert_eq!(msg.reply_to, None);
    }

    #[test]
    fn topic_messages_carry_the_wire_properties() {
        let message = OutboundMessage::new(Route::Topic("billing.invoice.created".into()), b"{}".to_vec())
            .with_message_type("billing.invoice.created")
            .with_correlation_id(Some("corr-9".into()));

        let props = publish_properties(&message);
        assert_eq!(text(props.kind()), Some("billing.invoice.created"));
        assert_eq!(text(props.content_type()), Some("application/json"));
        assert_eq!(text(props.correlation_id()), Some("corr-9"));
        let message_id = message.message_id.to_string();
        assert_eq!(text(props.message_id()), Some(message_id.as_str()));
        assert_eq!(*props.delivery_mode(), Some(PERSISTENT));
        assert!(props.timestamp().is_some());

        assert_eq!(
            publish_target(&message, "billing.exchange"),
            ("billing.exchange", "billing.invoice.created")
        );
    }

    #[test]
    fn replies_have_no_type_and_use_the_default_exchange() {
        let reply = OutboundMessage::new(Route::Reply("billing.replies".into()), b"{}".to_vec());

        let props = publish_properties(&reply);
        assert_eq!(*props.kind(), None);
        assert_eq!(text(props.correlation_id()), None);
        assert_eq!(publish_target(&reply, "billing.exchange"), ("", "billing.replies"));
    }
}
