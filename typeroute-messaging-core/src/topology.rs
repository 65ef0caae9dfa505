// typeroute-messaging-core/src/topology.rs
use crate::types::duplicate_wire_name;
use crate::{MessageType, MessagingError};

/// One queue-to-exchange binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binding {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

/// The broker objects a service needs: one durable topic exchange, one
/// durable queue, and a binding for every listened message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub queue: String,
    pub bindings: Vec<Binding>,
}

impl Topology {
    /// Derives the topology for `M`. Bindings follow the declaration order of
    /// the listened types.
    pub fn for_types<M: MessageType>(
        exchange: impl Into<String>,
        queue: impl Into<String>,
    ) -> Result<Self, MessagingError> {
        let exchange = exchange.into();
        let queue = queue.into();
        if exchange.trim().is_empty() {
            return Err(MessagingError::Config("exchange name is empty".into()));
        }
        if queue.trim().is_empty() {
            return Err(MessagingError::Config("queue name is empty".into()));
        }
        if let Some(name) = duplicate_wire_name::<M>() {
            return Err(MessagingError::Config(format!(
                "routing key '{name}' is declared by more than one message type"
            )));
        }

        let bindings = routing_keys::<M>()
            .into_iter()
            .map(|routing_key| Binding {
                queue: queue.clone(),
                exchange: exchange.clone(),
                routing_key: routing_key.to_string(),
            })
            .collect();

        Ok(Self {
            exchange,
            queue,
            bindings,
        })
    }

    pub fn routing_keys(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|b| b.routing_key.as_str())
    }
}

/// String forms of the listened types of `M`.
pub fn routing_keys<M: MessageType>() -> Vec<&'static str> {
    M::listened().into_iter().map(|t| t.as_str()).collect()
}
