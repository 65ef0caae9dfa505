// typeroute-messaging-core/src/registry.rs
//! Handler registry: message type → handlers that serve it.
//!
//! Built in two phases. A [`HandlerRegistryBuilder`] collects registrations
//! at startup, then [`HandlerRegistryBuilder::build`] freezes them into a
//! [`HandlerRegistry`] with no mutating methods, ready to be shared behind an
//! `Arc` by any number of dispatching tasks.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::types::duplicate_wire_name;
use crate::{MessageHandler, MessageType, MessagingError};

pub const DEFAULT_OPERATION: &str = "handle";

/// One handler registered for one message type.
#[derive(Clone)]
pub struct HandlerRegistration<M> {
    message_type: M,
    handler: Arc<dyn MessageHandler>,
    operation: String,
}

impl<M: MessageType> HandlerRegistration<M> {
    /// A registration using the default `"handle"` operation.
    pub fn new(message_type: M, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            message_type,
            handler,
            operation: DEFAULT_OPERATION.to_string(),
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    pub fn message_type(&self) -> M {
        self.message_type
    }

    pub fn handler(&self) -> &Arc<dyn MessageHandler> {
        &self.handler
    }

    pub fn handler_name(&self) -> &str {
        self.handler.name()
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }
}

impl<M: MessageType> fmt::Debug for HandlerRegistration<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("message_type", &self.message_type)
            .field("handler", &self.handler.name())
            .field("operation", &self.operation)
            .finish()
    }
}

/// Startup-time collector of registrations.
pub struct HandlerRegistryBuilder<M> {
    handlers: HashMap<M, Vec<HandlerRegistration<M>>>,
}

impl<M: MessageType> Default for HandlerRegistryBuilder<M> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<M: MessageType> HandlerRegistryBuilder<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler` to the sequence for `message_type`.
    pub fn register(
        &mut self,
        message_type: M,
        handler: Arc<dyn MessageHandler>,
        operation: impl Into<String>,
    ) -> Result<&mut Self, MessagingError> {
        self.add(HandlerRegistration::new(message_type, handler).with_operation(operation))
    }

    /// Like [`register`](Self::register) with the default operation name.
    pub fn register_default(
        &mut self,
        message_type: M,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<&mut Self, MessagingError> {
        self.add(HandlerRegistration::new(message_type, handler))
    }

    pub fn add(&mut self, registration: HandlerRegistration<M>) -> Result<&mut Self, MessagingError> {
        if registration.operation.trim().is_empty() {
            return Err(MessagingError::Registration(format!(
                "handler '{}' for {} has an empty operation name",
                registration.handler_name(),
                registration.message_type
            )));
        }

        debug!(
            message_type = %registration.message_type,
            handler = registration.handler_name(),
            operation = %registration.operation,
            "registered message handler"
        );
        self.handlers
            .entry(registration.message_type)
            .or_default()
            .push(registration);
        Ok(self)
    }

    /// Freezes the registrations. Fails if two message types share a string
    /// form, since handlers of the shadowed one could never run.
    pub fn build(self) -> Result<HandlerRegistry<M>, MessagingError> {
        if let Some(name) = duplicate_wire_name::<M>() {
            return Err(MessagingError::Registration(format!(
                "message type '{name}' is declared by more than one variant"
            )));
        }
        for (message_type, registrations) in &self.handlers {
            if !message_type.is_listened() {
                warn!(
                    message_type = %message_type,
                    handlers = registrations.len(),
                    "handlers registered for a type that is not listened; they will never receive messages"
                );
            }
        }
        Ok(HandlerRegistry {
            handlers: self.handlers,
        })
    }
}

/// Immutable mapping from message type to its registered handlers.
pub struct HandlerRegistry<M> {
    handlers: HashMap<M, Vec<HandlerRegistration<M>>>,
}

impl<M: MessageType> HandlerRegistry<M> {
    pub fn builder() -> HandlerRegistryBuilder<M> {
        HandlerRegistryBuilder::new()
    }

    /// Builds a registry from an explicit list of registrations.
    pub fn from_registrations(
        registrations: impl IntoIterator<Item = HandlerRegistration<M>>,
    ) -> Result<Self, MessagingError> {
        let mut builder = HandlerRegistryBuilder::new();
        for registration in registrations {
            builder.add(registration)?;
        }
        builder.build()
    }

    /// Handlers registered for `message_type`; empty when there are none.
    pub fn lookup(&self, message_type: M) -> &[HandlerRegistration<M>] {
        self.handlers
            .get(&message_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Types with at least one handler, in declaration order.
    pub fn registered_types(&self) -> Vec<M> {
        M::ALL
            .iter()
            .copied()
            .filter(|t| self.handlers.contains_key(t))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<M: MessageType> fmt::Debug for HandlerRegistry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.registered_types().into_iter().map(|t| (t, self.lookup(t))))
            .finish()
    }
}
