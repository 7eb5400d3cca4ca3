//! Defines the core trait for message handling logic.

use crate::message::InboundMessage;
use async_trait::async_trait;

/// Error produced by a [`MessageHandler`]. Contained within one delivery's
/// procedure; it drives the retry/discard decision and never escapes the
/// consume loop.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A trait for processing messages delivered from a queue.
///
/// Implement this trait with your business logic. The payload is handed
/// over as opaque bytes; decoding is the handler's concern.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Processes a single delivered message.
    ///
    /// Returning `Err` marks this delivery as failed and hands the decision
    /// over to the engine's retry policy.
    async fn handle(&self, message: &InboundMessage) -> Result<(), HandlerError>;

    /// A name for the handler, used for logging and identification.
    fn handler_name(&self) -> &str {
        "message-handler"
    }
}
