// typeroute-messaging-core/src/types.rs
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Flat key/value message body.
pub type Payload = HashMap<String, String>;

/// Closed set of message types known to a service.
///
/// The string form is used both as the AMQP routing key and as the value of
/// the `type` message property. Implement it with [`message_types!`](crate::message_types)
/// rather than by hand.
pub trait MessageType: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Every variant, in declaration order.
    const ALL: &'static [Self];

    fn as_str(&self) -> &'static str;

    /// Whether this service binds its queue to the type.
    fn is_listened(&self) -> bool;

    fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == value)
    }

    /// Listened variants, in declaration order.
    fn listened() -> Vec<Self> {
        Self::ALL.iter().copied().filter(|t| t.is_listened()).collect()
    }
}

/// First string form shared by two variants of `M`, if any. Such a set is
/// not closed: only the first variant can ever be parsed.
pub fn duplicate_wire_name<M: MessageType>() -> Option<&'static str> {
    let mut seen = HashSet::new();
    M::ALL.iter().map(|t| t.as_str()).find(|name| !seen.insert(*name))
}

/// Declares a message type enum and implements [`MessageType`], `Display` and
/// `FromStr` for it.
///
/// ```
/// use typeroute_messaging_core::{message_types, MessageType};
///
/// message_types! {
///     pub enum Billing {
///         InvoiceCreated("billing.invoice.created", listened = true),
///         InvoiceSent("billing.invoice.sent", listened = false),
///     }
/// }
///
/// assert_eq!(Billing::InvoiceCreated.to_string(), "billing.invoice.created");
/// assert_eq!(Billing::listened(), vec![Billing::InvoiceCreated]);
/// ```
#[macro_export]
macro_rules! message_types {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident ($wire:literal, listened = $listened:literal)
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $crate::MessageType for $name {
            const ALL: &'static [Self] = &[ $( $name::$variant, )+ ];

            fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $wire, )+
                }
            }

            fn is_listened(&self) -> bool {
                match self {
                    $( $name::$variant => $listened, )+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str($crate::MessageType::as_str(self))
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::MessagingError;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                <$name as $crate::MessageType>::parse(s)
                    .ok_or_else(|| $crate::MessagingError::UnknownMessageType(s.to_string()))
            }
        }
    };
}

/// A delivery handed to the dispatcher by a broker client.
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    /// Value of the `type` property, if any.
    pub message_type: Option<String>,
    pub body: Vec<u8>,
    pub routing_key: String,
    pub reply_to: Option<String>,
    pub correlation_id: Option<String>,
    pub message_id: Option<String>,
    pub redelivered: bool,
}

impl InboundMessage {
    pub fn new(message_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        let message_type = message_type.into();
        Self {
            routing_key: message_type.clone(),
            message_type: Some(message_type),
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Where an outbound message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// The well-known topic exchange, under this routing key.
    Topic(String),
    /// Straight to a queue through the broker's default exchange.
    Reply(String),
}

/// An encoded message ready for a [`Publisher`](crate::Publisher).
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub route: Route,
    /// Value of the `type` property. Replies carry none, so a peer consuming
    /// the reply queue cannot mistake them for requests.
    pub message_type: Option<String>,
    pub body: Vec<u8>,
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<String>,
}

impl OutboundMessage {
    pub const CONTENT_TYPE: &'static str = "application/json";

    pub fn new(route: Route, body: Vec<u8>) -> Self {
        Self {
            route,
            message_type: None,
            body,
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    pub fn with_message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}
