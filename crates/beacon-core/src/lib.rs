//! beacon-core — shared types and configuration for Beacon.
//!
//! Holds the data model exchanged between the membership bridge and the
//! service registry (node identities, registry instances, membership
//! snapshots), the per-cache configuration types, and the resolution of
//! `beacon.toml` plus environment fallbacks into [`DiscoveryProperties`].

pub mod config;
pub mod error;
pub mod types;

pub use config::{BeaconConfig, DiscoveryProperties, Environment};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
