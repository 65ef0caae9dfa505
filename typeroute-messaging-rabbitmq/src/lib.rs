mod delivery;
mod options;
mod rabbit_message_bus;

pub use delivery::{disposition, Disposition};
pub use options::RabbitMqOptions;
pub use rabbit_message_bus::RabbitMessageBus;
