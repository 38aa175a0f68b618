//! Error taxonomy for the adapter layer.
//!
//! Missing keys are never errors - they resolve to `Ok(None)`, which keeps
//! "empty" distinguishable from "broken".

use crate::key::KeyError;

#[derive(thiserror::Error, Debug)]
pub enum AdapterError {
    /// Backend unreachable or unwritable at connect time. Fatal to this
    /// adapter's availability, never to the registry as a whole.
    #[error("connection failed: {message}")]
    Connection { message: String },

    /// Unknown adapter name in the registry.
    #[error("no adapter registered under '{name}'")]
    NotFound { name: String },

    /// Malformed stored document encountered on read.
    #[error("malformed document at '{path}': {message}")]
    Serialization { path: String, message: String },

    /// A bounded probe exceeded its time budget. Treated as a soft failure
    /// by health reporting, never process-fatal.
    #[error("operation timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key: {0}")]
    Key(#[from] KeyError),
}

impl AdapterError {
    /// Shorthand for a serialization error at a key.
    pub fn serialization(path: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        AdapterError::Serialization {
            path: path.to_string(),
            message: err.to_string(),
        }
    }

    /// Shorthand for a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        AdapterError::Connection {
            message: message.into(),
        }
    }
}
