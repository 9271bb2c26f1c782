//! beacon-discovery — registry-backed membership for a clustering runtime.
//!
//! # Architecture
//!
//! ```text
//! beacond (assembly)
//!   ├── DiscoveryProperties ──► DiscoveryStrategyFactory
//!   │                             ├── configuration_properties() (built once)
//!   │                             └── new_strategy(identity) → MembershipBridge
//!   │                                   ├── start()          → connect + register (members only)
//!   │                                   ├── discover_nodes() → fresh registry snapshot
//!   │                                   └── destroy()        → deregister
//!   └── ClusterConfig ──► CacheConfigRegistry
//!                           └── get_or_create(id) → one MapCacheConfig per id,
//!                                                   one shared runtime instance
//! ```
//!
//! Nothing here runs a background task. Every bridge call is a single
//! awaited round-trip to the registry; the clustering runtime owns the
//! polling schedule.

pub mod bridge;
pub mod cache_registry;
pub mod cluster_config;
pub mod error;
pub mod strategy;

pub use bridge::{BridgeState, MembershipBridge};
pub use cache_registry::{CacheConfigRegistry, RuntimeFactory};
pub use cluster_config::{ClusterConfig, DISCOVERY_SPI_ENABLED, JoinConfig, MapConfigs};
pub use error::{CacheError, CacheResult, DiscoveryError, DiscoveryResult};
pub use strategy::{DiscoveryStrategyFactory, PropertyDefinition, PropertyKind};
