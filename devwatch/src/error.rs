//! Common error types for devwatch.
//!
//! This module provides a centralized Error enum using thiserror. Setup
//! failures (context, subscription, filter, activation) are returned to the
//! caller that asked for them. Steady-state failures are either recoverable
//! (`ReadFailed`) or terminate a dispatch loop (`PollFailed`).

use thiserror::Error;

/// Main error type for devwatch operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The device-notification subsystem could not be reached
    #[error("Device notification subsystem unavailable: {0}")]
    ContextUnavailable(String),

    /// A monitor could not be created from the named source
    #[error("Failed to create subscription on source '{source_name}': {reason}")]
    SubscriptionCreateFailed { source_name: String, reason: String },

    /// A filter was rejected, or added after activation
    #[error("Invalid filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    /// Activation was requested on an already active subscription
    #[error("Subscription is already activated")]
    AlreadyActivated,

    /// The subsystem refused to start delivering events
    #[error("Failed to activate subscription: {0}")]
    ActivationFailed(String),

    /// The operation needs an active subscription
    #[error("Subscription is not activated")]
    NotActivated,

    /// Receiving or decoding a device record failed
    #[error("Failed to read device event: {0}")]
    ReadFailed(String),

    /// The owning device context has already been released
    #[error("Device context used after close")]
    UseAfterClose,

    /// Waiting on the subscription descriptor failed; not recoverable
    #[error("Polling failed: {0}")]
    PollFailed(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors from std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a dispatch loop may keep running after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::ReadFailed(_))
    }
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_read_failures_are_recoverable() {
        assert!(Error::ReadFailed("bad record".into()).is_recoverable());
        assert!(!Error::PollFailed("POLLNVAL".into()).is_recoverable());
        assert!(!Error::UseAfterClose.is_recoverable());
        assert!(!Error::AlreadyActivated.is_recoverable());
    }

    #[test]
    fn display_names_the_filter() {
        let err = Error::InvalidFilter {
            filter: "tty".into(),
            reason: "subscription already activated".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid filter 'tty': subscription already activated"
        );
    }
}
