use thiserror::Error;

/// Error type shared by the consumer, producer, and channel layers.
///
/// Handler failures are deliberately *not* represented here: they are
/// business-logic outcomes contained within one delivery's procedure and
/// never surface through this type.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Error originating from the underlying `lapin` transport.
    #[error("AMQP transport error: {0}")]
    Transport(#[from] lapin::Error),

    /// Invalid or inconsistent configuration.
    #[error("configuration error: {message}")]
    Config { message: String },
}

// Allow converting from a string-like type into a Config error
impl From<&str> for ClientError {
    fn from(s: &str) -> Self {
        ClientError::Config { message: s.to_string() }
    }
}

impl From<String> for ClientError {
    fn from(s: String) -> Self {
        ClientError::Config { message: s }
    }
}
