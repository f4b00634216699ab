//! Crate-wide error type.
//!
//! Recoverable conditions (quota overruns, corrupt cache entries, cancelled
//! uploads) are resolved inside their owning component and never reach this
//! enum; what surfaces here is what a caller can actually act on.

use thiserror::Error;

use crate::crdt::TransportError;
use crate::kv::StorageError;

/// Errors surfaced by the Coscribe client core.
#[derive(Debug, Error)]
pub enum CoscribeError {
    /// The room does not exist on the server (HTTP 404).
    #[error("room not found")]
    RoomNotFound,

    /// The server rejected a request with a non-success status.
    #[error("server returned {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, as far as it could be read.
        message: String,
    },

    /// A network-level failure talking to the HTTP API.
    #[error("network error: {0}")]
    Network(String),

    /// Local key-value storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The live-stream transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The document engine rejected an update payload.
    #[error("document update rejected: {0}")]
    Doc(String),

    /// A payload could not be decoded (base64 or JSON).
    #[error("decode error: {0}")]
    Decode(String),

    /// A user-chosen room slug failed validation.
    #[error("invalid slug: {0}")]
    InvalidSlug(#[from] crate::ids::SlugError),
}

impl From<reqwest::Error> for CoscribeError {
    fn from(err: reqwest::Error) -> Self {
        CoscribeError::Network(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoscribeError>;
