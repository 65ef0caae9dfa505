// typeroute-messaging-core/src/handler.rs
use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::{codec, InboundMessage, MessagingError, OutboundMessage, Payload, Publisher, Route};

/// Failure raised by a handler operation.
///
/// `Io` is the I/O class: the dispatcher reports it as
/// [`MessagingError::BrokerIo`]. Every other variant becomes
/// [`MessagingError::ListenerFailed`].
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn other(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Other(Box::new(err))
    }
}

/// Application logic registered against one message type.
///
/// `Some` results are handed to the dispatcher's [`ResultHandler`].
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: &Payload) -> Result<Option<Payload>, HandlerError>;

    /// Identity used in logs and listener failures.
    fn name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }
}

fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// The handler that produced a result, and the message it was handling.
#[derive(Debug, Clone, Copy)]
pub struct ResultContext<'a> {
    pub message: &'a InboundMessage,
    pub handler: &'a str,
    pub operation: &'a str,
}

/// Receives non-null handler results before the next handler runs.
#[async_trait]
pub trait ResultHandler: Send + Sync {
    async fn handle_result(
        &self,
        ctx: ResultContext<'_>,
        result: Payload,
    ) -> Result<(), MessagingError>;
}

/// Logs results and drops them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogResults;

#[async_trait]
impl ResultHandler for LogResults {
    async fn handle_result(
        &self,
        ctx: ResultContext<'_>,
        result: Payload,
    ) -> Result<(), MessagingError> {
        info!(
            handler = ctx.handler,
            operation = ctx.operation,
            routing_key = %ctx.message.routing_key,
            entries = result.len(),
            "listener returned a result"
        );
        Ok(())
    }
}

/// Publishes results back to the inbound message's `reply_to` queue,
/// carrying its correlation id. Results for messages without a reply
/// address are logged and dropped.
pub struct ReplyResults<P> {
    publisher: P,
}

impl<P: Publisher> ReplyResults<P> {
    pub fn new(publisher: P) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl<P: Publisher> ResultHandler for ReplyResults<P> {
    async fn handle_result(
        &self,
        ctx: ResultContext<'_>,
        result: Payload,
    ) -> Result<(), MessagingError> {
        let Some(reply_to) = ctx.message.reply_to.as_deref() else {
            warn!(
                handler = ctx.handler,
                operation = ctx.operation,
                routing_key = %ctx.message.routing_key,
                "listener returned a result but the message has no reply_to; dropping it"
            );
            return Ok(());
        };

        let body = codec::encode(&result)?;
        let reply = OutboundMessage::new(Route::Reply(reply_to.to_string()), body)
            .with_correlation_id(ctx.message.correlation_id.clone());
        self.publisher.publish(reply).await
    }
}
