//! Cache config registry — one clustering runtime instance per process,
//! with per-name map configuration registered on demand.

use std::sync::{Arc, Mutex};

use beacon_core::{DiscoveryProperties, MapCacheConfig};
use tracing::{debug, info};

use crate::cluster_config::ClusterConfig;
use crate::error::{CacheError, CacheResult};

/// Creates (or looks up) the clustering runtime instance for a config.
///
/// Implementations are expected to return the same instance for the same
/// `instance_name`.
pub trait RuntimeFactory: Send + Sync {
    type Instance: Send + Sync;

    fn get_or_create(&self, config: &ClusterConfig) -> anyhow::Result<Arc<Self::Instance>>;
}

/// Hands out the shared runtime instance, making sure a map configuration
/// exists for every cache id requested through it.
pub struct CacheConfigRegistry<F: RuntimeFactory> {
    properties: Arc<DiscoveryProperties>,
    config: ClusterConfig,
    factory: F,
    instance: Mutex<Option<Arc<F::Instance>>>,
}

impl<F: RuntimeFactory> CacheConfigRegistry<F> {
    pub fn new(config: ClusterConfig, factory: F) -> Self {
        Self {
            properties: Arc::clone(config.discovery().properties()),
            config,
            factory,
            instance: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Return the runtime instance, registering a map config for `id` first
    /// if none exists.
    ///
    /// Every call returns the same instance. A runtime that fails to start
    /// surfaces [`CacheError::Runtime`] and the next call retries.
    pub fn get_or_create(&self, id: &str) -> CacheResult<Arc<F::Instance>> {
        self.config.map_configs().get_or_insert_with(id, || {
            let map = self.properties.map_cache_config(id);
            info!(
                cache = id,
                eviction = %map.eviction_policy,
                max_size_policy = %map.max_size_policy,
                max_size = map.max_size,
                ttl_seconds = map.ttl_seconds,
                "registered map cache config"
            );
            map
        });

        let mut slot = self.instance.lock().expect("runtime instance lock");
        if let Some(instance) = slot.as_ref() {
            return Ok(Arc::clone(instance));
        }

        let instance = self
            .factory
            .get_or_create(&self.config)
            .map_err(CacheError::Runtime)?;
        debug!(instance = %self.config.instance_name(), "runtime instance ready");
        *slot = Some(Arc::clone(&instance));
        Ok(instance)
    }

    pub fn map_config(&self, id: &str) -> Option<Arc<MapCacheConfig>> {
        self.config.map_configs().get(id)
    }

    /// Number of distinct map configs registered so far.
    pub fn map_config_count(&self) -> usize {
        self.config.map_configs().len()
    }
}
