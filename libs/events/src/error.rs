//! Error types for lifecycle vocabulary parsing.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// A persisted status string does not name any known status.
    #[error("unknown status: {0}")]
    UnknownStatus(String),

    /// A persisted platform string does not name any known cloud platform.
    #[error("unknown cloud platform: {0}")]
    UnknownPlatform(String),
}
