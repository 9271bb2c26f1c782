//! beacon.toml parsing and discovery property resolution.
//!
//! Every setting resolves through the same chain: an explicit value from
//! the config file wins, then a value sourced from the environment, then
//! the built-in default (or absent, for credentials and the registry
//! address).

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::types::{EvictionPolicy, MapCacheConfig, MaxSizePolicy};

pub const DEFAULT_NAMESPACE: &str = "discovery-hazelcast";
pub const DEFAULT_CLUSTER_NAME: &str = "hazelcast";
pub const DEFAULT_APP_NAME: &str = "application";
pub const APPLICATION_NAME_SUFFIX: &str = "-hazelcast-instance";
pub const DEFAULT_CACHE_SIZE: u32 = 5000;
pub const DEFAULT_TTL_SECONDS: u32 = 300;

/// Environment variables consulted when the config file leaves a value unset.
pub mod env_keys {
    pub const SERVER_ADDR: &str = "REGISTRY_SERVER_ADDR";
    pub const NAMESPACE: &str = "REGISTRY_NAMESPACE";
    pub const USERNAME: &str = "REGISTRY_USERNAME";
    pub const PASSWORD: &str = "REGISTRY_PASSWORD";
    pub const ACCESS_KEY: &str = "REGISTRY_ACCESS_KEY";
    pub const SECRET_KEY: &str = "REGISTRY_SECRET_KEY";
    pub const APP_NAME: &str = "APP_NAME";

    pub const ALL: [&str; 7] = [
        SERVER_ADDR,
        NAMESPACE,
        USERNAME,
        PASSWORD,
        ACCESS_KEY,
        SECRET_KEY,
        APP_NAME,
    ];
}

/// Raw contents of `beacon.toml`. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeaconConfig {
    pub registry: Option<RegistrySection>,
    pub cache: Option<CacheSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySection {
    pub server_address: Option<String>,
    pub namespace: Option<String>,
    pub cluster_name: Option<String>,
    pub application_name: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSection {
    pub size: Option<u32>,
    pub ttl_seconds: Option<u32>,
    pub eviction_policy: Option<String>,
    pub max_size_policy: Option<String>,
}

impl BeaconConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Ambient values the config file falls back to.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    /// Capture the recognized variables from the process environment.
    pub fn from_process() -> Self {
        let vars = std::env::vars()
            .filter(|(key, _)| env_keys::ALL.contains(&key.as_str()))
            .collect();
        Self { vars }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Look up a variable; empty values count as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

/// Resolved, immutable discovery configuration.
#[derive(Clone, PartialEq)]
pub struct DiscoveryProperties {
    server_address: Option<String>,
    namespace: String,
    cluster_name: String,
    application_name: String,
    username: Option<String>,
    password: Option<String>,
    access_key: Option<String>,
    secret_key: Option<String>,
    cache_size: u32,
    ttl_seconds: u32,
    eviction_policy: EvictionPolicy,
    max_size_policy: MaxSizePolicy,
}

impl DiscoveryProperties {
    /// Resolve a parsed config file against the environment.
    pub fn resolve(config: &BeaconConfig, env: &Environment) -> ConfigResult<Self> {
        let cache = config.cache.clone().unwrap_or_default();

        let eviction_policy = match non_empty(cache.eviction_policy) {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "cache.eviction.policy",
                value: raw,
            })?,
            None => EvictionPolicy::default(),
        };

        let max_size_policy = match non_empty(cache.max_size_policy) {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "cache.max.size.policy",
                value: raw,
            })?,
            None => MaxSizePolicy::default(),
        };

        let props = Self::with_registry(config.registry.clone().unwrap_or_default(), env);
        Ok(Self {
            cache_size: cache.size.unwrap_or(DEFAULT_CACHE_SIZE),
            ttl_seconds: cache.ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS),
            eviction_policy,
            max_size_policy,
            ..props
        })
    }

    /// Properties built purely from the environment and defaults.
    pub fn from_env(env: &Environment) -> Self {
        Self::with_registry(RegistrySection::default(), env)
    }

    fn with_registry(registry: RegistrySection, env: &Environment) -> Self {
        let explicit_or_env = |value: Option<String>, key: &str| {
            non_empty(value).or_else(|| env.get(key).map(str::to_string))
        };

        let application_name = non_empty(registry.application_name).unwrap_or_else(|| {
            let app = env.get(env_keys::APP_NAME).unwrap_or(DEFAULT_APP_NAME);
            format!("{app}{APPLICATION_NAME_SUFFIX}")
        });

        Self {
            server_address: explicit_or_env(registry.server_address, env_keys::SERVER_ADDR),
            namespace: explicit_or_env(registry.namespace, env_keys::NAMESPACE)
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            cluster_name: non_empty(registry.cluster_name)
                .unwrap_or_else(|| DEFAULT_CLUSTER_NAME.to_string()),
            application_name,
            username: explicit_or_env(registry.username, env_keys::USERNAME),
            password: explicit_or_env(registry.password, env_keys::PASSWORD),
            access_key: explicit_or_env(registry.access_key, env_keys::ACCESS_KEY),
            secret_key: explicit_or_env(registry.secret_key, env_keys::SECRET_KEY),
            cache_size: DEFAULT_CACHE_SIZE,
            ttl_seconds: DEFAULT_TTL_SECONDS,
            eviction_policy: EvictionPolicy::default(),
            max_size_policy: MaxSizePolicy::default(),
        }
    }

    /// Load from an optional config file, falling back to `env` and defaults.
    pub fn load(path: Option<&Path>, env: &Environment) -> ConfigResult<Self> {
        let config = match path {
            Some(path) => BeaconConfig::from_file(path)?,
            None => BeaconConfig::default(),
        };
        Self::resolve(&config, env)
    }

    pub fn server_address(&self) -> Option<&str> {
        self.server_address.as_deref()
    }

    /// The registry address, or [`ConfigError::Missing`] when unset.
    pub fn require_server_address(&self) -> ConfigResult<&str> {
        self.server_address()
            .ok_or(ConfigError::Missing("registry.server.address"))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn access_key(&self) -> Option<&str> {
        self.access_key.as_deref()
    }

    pub fn secret_key(&self) -> Option<&str> {
        self.secret_key.as_deref()
    }

    pub fn cache_size(&self) -> u32 {
        self.cache_size
    }

    pub fn ttl_seconds(&self) -> u32 {
        self.ttl_seconds
    }

    pub fn eviction_policy(&self) -> EvictionPolicy {
        self.eviction_policy
    }

    pub fn max_size_policy(&self) -> MaxSizePolicy {
        self.max_size_policy
    }

    /// Cache configuration for `id` built from the configured defaults.
    pub fn map_cache_config(&self, id: &str) -> MapCacheConfig {
        MapCacheConfig {
            id: id.to_string(),
            eviction_policy: self.eviction_policy,
            max_size_policy: self.max_size_policy,
            max_size: self.cache_size,
            ttl_seconds: self.ttl_seconds,
        }
    }

    /// Builder method: set the registry address.
    pub fn with_server_address(self, address: impl Into<String>) -> Self {
        Self {
            server_address: Some(address.into()),
            ..self
        }
    }

    /// Builder method: set the cluster name.
    pub fn with_cluster_name(self, cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            ..self
        }
    }

    /// Builder method: set the published service name.
    pub fn with_application_name(self, application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            ..self
        }
    }

    /// Builder method: set the registry namespace.
    pub fn with_namespace(self, namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..self
        }
    }
}

impl Default for DiscoveryProperties {
    fn default() -> Self {
        Self::from_env(&Environment::default())
    }
}

impl fmt::Debug for DiscoveryProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("DiscoveryProperties")
            .field("server_address", &self.server_address)
            .field("namespace", &self.namespace)
            .field("cluster_name", &self.cluster_name)
            .field("application_name", &self.application_name)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("access_key", &self.access_key)
            .field("secret_key", &redact(&self.secret_key))
            .field("cache_size", &self.cache_size)
            .field("ttl_seconds", &self.ttl_seconds)
            .field("eviction_policy", &self.eviction_policy)
            .field("max_size_policy", &self.max_size_policy)
            .finish()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
