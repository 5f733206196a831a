//! Error types for the event bus.

/// Errors raised when registering a subscriber.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Handler subscribers run on their own task and need a Tokio runtime.
    #[error("channel {channel}: handler subscription requires a running Tokio runtime")]
    NoRuntime {
        /// The channel the subscription was attempted on.
        channel: &'static str,
    },
}

/// A fault reported by a subscriber handler.
///
/// Handler faults are logged and counted by the bus; they never reach the
/// publisher or the other subscribers of the channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Create a handler error with a description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The description of the fault.
    pub fn message(&self) -> &str {
        &self.message
    }
}
