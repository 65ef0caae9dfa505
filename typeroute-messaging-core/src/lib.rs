pub mod bus;
pub mod codec;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod memory;
pub mod metrics;
pub mod registry;
pub mod sender;
pub mod topology;
pub mod types;

pub use bus::Publisher;
pub use dispatcher::{DispatchOptions, DispatchOutcome, FailurePolicy, RoutingDispatcher};
pub use error::MessagingError;
pub use handler::{
    HandlerError, LogResults, MessageHandler, ReplyResults, ResultContext, ResultHandler,
};
pub use memory::InMemoryPublisher;
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use registry::{HandlerRegistration, HandlerRegistry, HandlerRegistryBuilder, DEFAULT_OPERATION};
pub use sender::MessageSender;
pub use topology::{routing_keys, Binding, Topology};
pub use types::{InboundMessage, MessageType, OutboundMessage, Payload, Route};
