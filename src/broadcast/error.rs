//! Broadcaster error types
//!
//! Only `subscribe` can fail. Publishing and unsubscribing never return errors.

/// Error type for broadcaster operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    /// The broadcaster has been shut down
    ShutDown,
    /// The configured subscriber limit is reached
    TooManySubscribers(usize),
}

impl std::fmt::Display for BroadcastError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BroadcastError::ShutDown => write!(f, "Broadcaster is shut down"),
            BroadcastError::TooManySubscribers(limit) => {
                write!(f, "Subscriber limit reached: {}", limit)
            }
        }
    }
}

impl std::error::Error for BroadcastError {}
