//! In-process runtime instances, one per instance name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use beacon_discovery::{ClusterConfig, RuntimeFactory};
use tracing::{debug, info};

use crate::map::LocalMap;

/// A running instance. Owns the maps handed out by [`LocalRuntime::map`].
pub struct LocalRuntime {
    config: ClusterConfig,
    maps: RwLock<HashMap<String, Arc<LocalMap>>>,
}

impl LocalRuntime {
    fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            maps: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        self.config.instance_name()
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// The map called `name`, created on first access.
    ///
    /// Uses the registered map config for `name` when there is one, and the
    /// configured defaults otherwise.
    pub fn map(&self, name: &str) -> Arc<LocalMap> {
        if let Some(map) = self.maps.read().expect("maps lock").get(name) {
            return Arc::clone(map);
        }

        let mut maps = self.maps.write().expect("maps lock");
        let map = maps.entry(name.to_string()).or_insert_with(|| {
            let config = self.config.map_configs().get(name).unwrap_or_else(|| {
                debug!(map = name, "no registered config; using defaults");
                Arc::new(self.config.discovery().properties().map_cache_config(name))
            });
            debug!(instance = %self.name(), map = name, "created map");
            Arc::new(LocalMap::new(config))
        });
        Arc::clone(map)
    }

    /// Names of the maps created so far, sorted.
    pub fn map_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.maps.read().expect("maps lock").keys().cloned().collect();
        names.sort();
        names
    }
}

/// Looks up or starts [`LocalRuntime`]s keyed by instance name.
#[derive(Default)]
pub struct LocalRuntimeFactory {
    instances: Mutex<HashMap<String, Arc<LocalRuntime>>>,
}

impl LocalRuntimeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance(&self, name: &str) -> Option<Arc<LocalRuntime>> {
        self.instances.lock().expect("instances lock").get(name).cloned()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.lock().expect("instances lock").len()
    }
}

impl RuntimeFactory for LocalRuntimeFactory {
    type Instance = LocalRuntime;

    fn get_or_create(&self, config: &ClusterConfig) -> anyhow::Result<Arc<LocalRuntime>> {
        if config.instance_name().is_empty() {
            anyhow::bail!("runtime instance name must not be empty");
        }

        let mut instances = self.instances.lock().expect("instances lock");
        let runtime = instances
            .entry(config.instance_name().to_string())
            .or_insert_with(|| {
                info!(
                    instance = %config.instance_name(),
                    tcp_ip = config.join().tcp_ip_enabled,
                    multicast = config.join().multicast_enabled,
                    "starting runtime instance"
                );
                Arc::new(LocalRuntime::new(config.clone()))
            });
        Ok(Arc::clone(runtime))
    }
}
