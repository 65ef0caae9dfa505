// typeroute-messaging-core/src/error.rs
use std::time::Duration;

use thiserror::Error;

use crate::handler::HandlerError;

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("topology error: {0}")]
    Topology(String),

    #[error("registration error: {0}")]
    Registration(String),

    #[error("message has no type attribute")]
    MissingMessageType,

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// An I/O-class failure raised by a handler. Kept apart from
    /// [`MessagingError::ListenerFailed`] so transport-level retry can
    /// special-case it.
    #[error("broker I/O failure in listener '{handler}:{operation}': {source}")]
    BrokerIo {
        handler: String,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("listener method '{handler}:{operation}' threw exception: {source}")]
    ListenerFailed {
        handler: String,
        operation: String,
        #[source]
        source: HandlerError,
    },

    #[error("listener method '{handler}:{operation}' timed out after {timeout:?}")]
    HandlerTimeout {
        handler: String,
        operation: String,
        timeout: Duration,
    },

    /// Collected failures of a dispatch cycle run with
    /// [`FailurePolicy::ContinueOnError`](crate::FailurePolicy::ContinueOnError).
    #[error("{} of {total} listeners failed", .failures.len())]
    DispatchFailed {
        total: usize,
        failures: Vec<MessagingError>,
    },
}

impl MessagingError {
    /// True for broker I/O failures, including any collected in a
    /// [`MessagingError::DispatchFailed`].
    pub fn is_io(&self) -> bool {
        match self {
            Self::BrokerIo { .. } => true,
            Self::DispatchFailed { failures, .. } => failures.iter().any(Self::is_io),
            _ => false,
        }
    }

    /// True when the message itself is malformed for this service: no type,
    /// an unknown type, or an undecodable body. Redelivering it cannot help.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::MissingMessageType | Self::UnknownMessageType(_) | Self::Serialization(_)
        )
    }

    pub(crate) fn from_handler(handler: &str, operation: &str, err: HandlerError) -> Self {
        match err {
            HandlerError::Io(source) => Self::BrokerIo {
                handler: handler.to_string(),
                operation: operation.to_string(),
                source,
            },
            other => Self::ListenerFailed {
                handler: handler.to_string(),
                operation: operation.to_string(),
                source: other,
            },
        }
    }
}
