//! Errors shared by the domain types.
//!
//! Each subsystem keeps its own error enum next to its code (`WeavingError`,
//! `MediatorError`, `ConfigError`, `SinkError`, ...). Only the types that cross
//! every layer live here.

use std::sync::Arc;

use thiserror::Error;

/// Error type returned by user-supplied callbacks (owner factories, methods).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Cause handed to a message's negative-acknowledgement callback.
pub type FailureCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// An acknowledgement callback (ack or nack) failed.
#[derive(Debug, Clone, Error)]
#[error("acknowledgement failed: {0}")]
pub struct AckError(pub String);

impl AckError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
