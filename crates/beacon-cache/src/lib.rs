//! beacon-cache — the in-process clustering runtime behind
//! [`beacon_discovery::CacheConfigRegistry`].
//!
//! [`LocalRuntimeFactory`] keeps one [`LocalRuntime`] per instance name.
//! A runtime hands out [`LocalMap`]s whose bounds, eviction, and expiry
//! follow the [`beacon_core::MapCacheConfig`] registered for the map name.

pub mod map;
pub mod runtime;

pub use map::{LocalMap, MapStats, PARTITION_COUNT};
pub use runtime::{LocalRuntime, LocalRuntimeFactory};
