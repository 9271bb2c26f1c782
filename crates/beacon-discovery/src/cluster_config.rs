//! Cluster configuration handed to the clustering runtime.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use beacon_core::MapCacheConfig;

use crate::strategy::DiscoveryStrategyFactory;

/// Runtime property that switches the pluggable discovery mechanism on.
pub const DISCOVERY_SPI_ENABLED: &str = "discovery.spi.enabled";

/// Which join mechanisms the runtime may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinConfig {
    pub tcp_ip_enabled: bool,
    pub multicast_enabled: bool,
}

/// Per-map cache settings shared by every holder of a [`ClusterConfig`].
///
/// Clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct MapConfigs {
    inner: Arc<RwLock<HashMap<String, Arc<MapCacheConfig>>>>,
}

impl MapConfigs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<MapCacheConfig>> {
        self.inner.read().expect("map configs lock").get(name).cloned()
    }

    /// Return the config for `name`, building it with `build` if absent.
    ///
    /// `build` runs at most once per name, even under concurrent callers.
    pub fn get_or_insert_with<F>(&self, name: &str, build: F) -> Arc<MapCacheConfig>
    where
        F: FnOnce() -> MapCacheConfig,
    {
        if let Some(existing) = self.get(name) {
            return existing;
        }

        let mut configs = self.inner.write().expect("map configs lock");
        Arc::clone(
            configs
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(build())),
        )
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("map configs lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered map names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .read()
            .expect("map configs lock")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Configuration for one clustering runtime instance.
///
/// Built by [`ClusterConfig::for_discovery`] so that the registry is the
/// only membership source: the runtime's own TCP/IP and multicast joiners
/// are off and exactly one discovery strategy is installed.
#[derive(Clone)]
pub struct ClusterConfig {
    instance_name: String,
    properties: BTreeMap<String, String>,
    join: JoinConfig,
    discovery: Arc<DiscoveryStrategyFactory>,
    map_configs: MapConfigs,
}

impl ClusterConfig {
    pub fn for_discovery(discovery: Arc<DiscoveryStrategyFactory>) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert(DISCOVERY_SPI_ENABLED.to_string(), "true".to_string());

        Self {
            instance_name: discovery.properties().application_name().to_string(),
            properties,
            join: JoinConfig {
                tcp_ip_enabled: false,
                multicast_enabled: false,
            },
            discovery,
            map_configs: MapConfigs::new(),
        }
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn join(&self) -> JoinConfig {
        self.join
    }

    pub fn discovery(&self) -> &Arc<DiscoveryStrategyFactory> {
        &self.discovery
    }

    pub fn map_configs(&self) -> &MapConfigs {
        &self.map_configs
    }
}
