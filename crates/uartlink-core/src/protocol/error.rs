//! Link errors

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while driving the serial link
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Link guard unavailable: {0}")]
    ExclusionUnavailable(String),

    #[error("Timed out after {0:?} waiting for the link guard")]
    ExclusionTimeout(Duration),

    #[error("Failed to open {path}: {reason}")]
    DeviceOpenFailed { path: String, reason: String },

    #[error("Failed to read link attributes: {0}")]
    AttributeReadFailed(String),

    #[error("Failed to apply link attributes: {0}")]
    AttributeWriteFailed(String),

    #[error("Device already open in this process: {0}")]
    AlreadyOpen(String),

    #[error("Link not open")]
    LinkNotOpen,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Whether the caller can reasonably reopen the link and try again
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, LinkError::ExclusionUnavailable(_))
    }
}
