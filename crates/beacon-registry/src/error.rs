//! Registry error types.

use thiserror::Error;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur while talking to the service registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no registry address configured")]
    NoAddress,

    #[error("failed to connect to registry at {address}: {message}")]
    Connect { address: String, message: String },

    #[error("registry request timed out: {0}")]
    Timeout(String),

    #[error("registry rejected credentials: {0}")]
    Unauthorized(String),

    #[error("registry returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("failed to decode registry response: {0}")]
    Decode(String),

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}
