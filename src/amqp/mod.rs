//! AMQP integration for the lobby service
//!
//! Commands are consumed from a durable queue and lobby events are published
//! to a topic exchange.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{CommandConsumer, CommandReply, MessageHandler, RegistryCommandHandler};
pub use messages::*;
pub use publisher::{
    AmqpEventPublisher, EventPublisher, MockEventPublisher, NoOpEventPublisher, PublisherConfig,
};
