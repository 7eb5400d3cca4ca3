//! # AMQP Redelivery
//! A reliability layer between message handlers and an AMQP channel, with
//! header-driven, bounded, backed-off redelivery of failed messages.
//!
//! The consumer runs a caller-supplied [`MessageHandler`] for every
//! delivered message and resolves each delivery into exactly one terminal
//! action: acknowledge on success; on failure, discard or republish to a
//! retry exchange with an incremented `x-attempt` header and an `x-delay`
//! hint. Retry progress lives entirely in message headers, so the engine
//! itself is stateless across deliveries.

pub mod channel;
pub mod consumer;
pub mod error;
pub mod handler;
pub mod message;
pub mod producer;
pub mod retry;

// Re-export key components for easy access
pub use channel::{AmqpChannel, Channel, MessageStream};
pub use consumer::{Consumer, ConsumerConfig, ConsumerConfigBuilder};
pub use error::ClientError;
pub use handler::{HandlerError, MessageHandler};
pub use message::{InboundMessage, X_ATTEMPT, X_DELAY};
pub use producer::{Producer, ProducerConfig};
pub use retry::{AdmissionCheck, DelayFn, DelayPolicy, RetryPolicy, RetryTarget};
