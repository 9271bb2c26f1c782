//! Discovery strategy factory.
//!
//! The clustering runtime asks the factory which configuration keys the
//! strategy understands, then asks it for one strategy per node.

use std::sync::{Arc, OnceLock};

use beacon_core::{DiscoveryProperties, Identity};
use beacon_registry::RegistryConnector;
use tracing::debug;

use crate::bridge::MembershipBridge;

/// Type of a configuration property. Every registry property is a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    String,
}

/// Describes one configuration key the strategy accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDefinition {
    pub key: &'static str,
    pub kind: PropertyKind,
    pub optional: bool,
    /// The resolved value, when set. Secrets are never exposed here.
    pub value: Option<String>,
}

impl PropertyDefinition {
    fn new(key: &'static str, optional: bool, value: Option<&str>) -> Self {
        Self {
            key,
            kind: PropertyKind::String,
            optional,
            value: value.map(str::to_string),
        }
    }
}

/// Builds [`MembershipBridge`]s that share one set of resolved properties
/// and one registry connector.
pub struct DiscoveryStrategyFactory {
    properties: Arc<DiscoveryProperties>,
    connector: Arc<dyn RegistryConnector>,
    definitions: OnceLock<Vec<PropertyDefinition>>,
}

impl DiscoveryStrategyFactory {
    pub fn new(properties: Arc<DiscoveryProperties>, connector: Arc<dyn RegistryConnector>) -> Self {
        Self {
            properties,
            connector,
            definitions: OnceLock::new(),
        }
    }

    pub fn properties(&self) -> &Arc<DiscoveryProperties> {
        &self.properties
    }

    /// Configuration keys understood by the strategy.
    ///
    /// Built on first access and returned unchanged afterwards.
    pub fn configuration_properties(&self) -> &[PropertyDefinition] {
        self.definitions.get_or_init(|| {
            let props = &self.properties;
            let definitions = vec![
                PropertyDefinition::new("registry.server.address", false, props.server_address()),
                PropertyDefinition::new("registry.namespace", true, Some(props.namespace())),
                PropertyDefinition::new("registry.cluster.name", true, Some(props.cluster_name())),
                PropertyDefinition::new(
                    "registry.application.name",
                    true,
                    Some(props.application_name()),
                ),
                PropertyDefinition::new("registry.username", true, props.username()),
                PropertyDefinition::new("registry.password", true, None),
                PropertyDefinition::new("registry.access.key", true, props.access_key()),
                PropertyDefinition::new("registry.secret.key", true, None),
            ];
            debug!(count = definitions.len(), "built discovery property definitions");
            definitions
        })
    }

    /// A fresh bridge for a node. `None` builds a lightweight client that
    /// discovers without registering.
    pub fn new_strategy(&self, local: Option<Identity>) -> MembershipBridge {
        MembershipBridge::new(
            Arc::clone(&self.properties),
            Arc::clone(&self.connector),
            local,
        )
    }
}
