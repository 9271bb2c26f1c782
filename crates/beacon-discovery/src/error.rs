//! Discovery and cache registry error types.

use beacon_core::ConfigError;
use beacon_registry::RegistryError;
use thiserror::Error;

use crate::bridge::BridgeState;

/// Result type alias for membership bridge operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Errors surfaced by the membership bridge.
///
/// `Configuration` is raised before any network call. `RegistryUnavailable`
/// wraps whatever the registry reported and is fatal for the call that
/// triggered it; a failed discovery means the poll failed, not that the
/// cluster is empty.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("error while talking to the registry during {operation}: {source}")]
    RegistryUnavailable {
        operation: &'static str,
        #[source]
        source: RegistryError,
    },

    #[error("cannot {operation} while the bridge is {state}")]
    InvalidState {
        operation: &'static str,
        state: BridgeState,
    },
}

/// Result type alias for cache registry operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by the cache config registry.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("runtime error: {0}")]
    Runtime(#[from] anyhow::Error),
}
