//! Shared types used across Beacon crates.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Metadata key that mirrors an instance's cluster name.
pub const CLUSTER_METADATA_KEY: &str = "cluster";

/// A node's reachable network identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    host: String,
    port: u16,
}

impl Identity {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// An instance as stored in and returned by the service registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryInstance {
    pub ip: String,
    pub port: u16,
    pub cluster_name: String,
    #[serde(default = "default_healthy")]
    pub healthy: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_healthy() -> bool {
    true
}

impl RegistryInstance {
    /// Build the registration record for a member node.
    ///
    /// `metadata["cluster"]` mirrors the cluster name so the registry can
    /// filter on it.
    pub fn for_member(identity: &Identity, cluster_name: &str) -> Self {
        let metadata = HashMap::from([(
            CLUSTER_METADATA_KEY.to_string(),
            cluster_name.to_string(),
        )]);

        Self {
            ip: identity.host().to_string(),
            port: identity.port(),
            cluster_name: cluster_name.to_string(),
            healthy: true,
            metadata,
        }
    }

    /// The node identity this instance advertises.
    pub fn identity(&self) -> Identity {
        Identity::new(self.ip.clone(), self.port)
    }

    /// Whether this instance denotes the same endpoint as `other`.
    pub fn same_endpoint(&self, other: &RegistryInstance) -> bool {
        self.ip == other.ip && self.port == other.port && self.cluster_name == other.cluster_name
    }
}

/// Point-in-time set of node identities returned by one discovery query.
///
/// Unordered; equality is set equality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipSnapshot {
    members: HashSet<Identity>,
}

impl MembershipSnapshot {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.members.contains(identity)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.members.iter()
    }

    pub fn into_members(self) -> HashSet<Identity> {
        self.members
    }
}

impl FromIterator<Identity> for MembershipSnapshot {
    fn from_iter<T: IntoIterator<Item = Identity>>(iter: T) -> Self {
        Self {
            members: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for MembershipSnapshot {
    type Item = Identity;
    type IntoIter = std::collections::hash_set::IntoIter<Identity>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.into_iter()
    }
}

/// Rule for choosing which cache entry to drop when a map is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvictionPolicy {
    #[default]
    Lru,
    Lfu,
    Random,
    None,
}

impl EvictionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "LRU",
            EvictionPolicy::Lfu => "LFU",
            EvictionPolicy::Random => "RANDOM",
            EvictionPolicy::None => "NONE",
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LRU" => Ok(EvictionPolicy::Lru),
            "LFU" => Ok(EvictionPolicy::Lfu),
            "RANDOM" => Ok(EvictionPolicy::Random),
            "NONE" => Ok(EvictionPolicy::None),
            other => Err(format!("unknown eviction policy: {other}")),
        }
    }
}

/// How a map's `max_size` is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaxSizePolicy {
    /// Maximum entry count per node.
    #[default]
    PerNode,
    /// Maximum entry count per partition.
    PerPartition,
    UsedHeapSize,
    UsedHeapPercentage,
    FreeHeapSize,
    FreeHeapPercentage,
}

impl MaxSizePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaxSizePolicy::PerNode => "PER_NODE",
            MaxSizePolicy::PerPartition => "PER_PARTITION",
            MaxSizePolicy::UsedHeapSize => "USED_HEAP_SIZE",
            MaxSizePolicy::UsedHeapPercentage => "USED_HEAP_PERCENTAGE",
            MaxSizePolicy::FreeHeapSize => "FREE_HEAP_SIZE",
            MaxSizePolicy::FreeHeapPercentage => "FREE_HEAP_PERCENTAGE",
        }
    }

    /// Whether the bound counts entries rather than memory.
    pub fn is_entry_count(&self) -> bool {
        matches!(self, MaxSizePolicy::PerNode | MaxSizePolicy::PerPartition)
    }
}

impl fmt::Display for MaxSizePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaxSizePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "PER_NODE" => Ok(MaxSizePolicy::PerNode),
            "PER_PARTITION" => Ok(MaxSizePolicy::PerPartition),
            "USED_HEAP_SIZE" => Ok(MaxSizePolicy::UsedHeapSize),
            "USED_HEAP_PERCENTAGE" => Ok(MaxSizePolicy::UsedHeapPercentage),
            "FREE_HEAP_SIZE" => Ok(MaxSizePolicy::FreeHeapSize),
            "FREE_HEAP_PERCENTAGE" => Ok(MaxSizePolicy::FreeHeapPercentage),
            other => Err(format!("unknown max size policy: {other}")),
        }
    }
}

/// Eviction, size and expiry settings for one named cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapCacheConfig {
    pub id: String,
    pub eviction_policy: EvictionPolicy,
    pub max_size_policy: MaxSizePolicy,
    pub max_size: u32,
    /// Zero disables expiry.
    pub ttl_seconds: u32,
}

impl MapCacheConfig {
    /// Entry time-to-live, `None` when expiry is disabled.
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_seconds > 0).then(|| Duration::from_secs(self.ttl_seconds as u64))
    }
}
