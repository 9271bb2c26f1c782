//! beacon-registry — the service registry as seen by Beacon.
//!
//! The registry is a black box that stores, per namespace and service
//! name, the set of instances registered under it. This crate defines the
//! seams the membership bridge talks through and ships three backends:
//!
//! ```text
//! RegistryConnector ──connect(settings)──► Arc<dyn RegistryClient>
//!   ├── NacosConnector   → NacosClient (naming-service open HTTP API)
//!   └── MemoryRegistry   → MemoryRegistryClient (in-process, optional call log)
//!
//! server::build_router(MemoryRegistry): the same HTTP API served from memory
//! ```

pub mod client;
pub mod error;
pub mod memory;
pub mod nacos;
pub mod server;

pub use client::{ConnectionSettings, RegistryClient, RegistryConnector};
pub use error::{RegistryError, RegistryResult};
pub use memory::{MemoryRegistry, Operation, RegistryCall};
pub use nacos::{NacosClient, NacosConnector};
