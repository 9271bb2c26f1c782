//! Membership bridge — publishes this node to the registry and asks the
//! registry who else is in the cluster.
//!
//! Lifecycle:
//!
//! ```text
//! Created ──start()──► Started ──destroy()──► Destroyed
//!    └───────────────destroy()──────────────────┘
//! ```
//!
//! A failed `start()` leaves the bridge in `Created`. Once a member's
//! registry client is established its instance counts as registered, even
//! if the register call itself failed: the registry may have stored it
//! before the error, so `destroy()` still deregisters. `Destroyed` is
//! terminal.

use std::fmt;
use std::sync::Arc;

use beacon_core::{DiscoveryProperties, Identity, MembershipSnapshot, RegistryInstance};
use beacon_registry::{ConnectionSettings, RegistryClient, RegistryConnector, RegistryError};
use tracing::{debug, info};

use crate::error::{DiscoveryError, DiscoveryResult};

/// Lifecycle state of a [`MembershipBridge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Created,
    Started,
    Destroyed,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BridgeState::Created => "created",
            BridgeState::Started => "started",
            BridgeState::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// Registry-backed discovery for one node.
///
/// `start` and `destroy` take `&mut self`: the caller serializes them.
/// `discover_nodes` only reads and may be called from any task holding a
/// shared reference.
pub struct MembershipBridge {
    properties: Arc<DiscoveryProperties>,
    connector: Arc<dyn RegistryConnector>,
    /// This node's identity. `None` for a lightweight client.
    local: Option<Identity>,
    state: BridgeState,
    client: Option<Arc<dyn RegistryClient>>,
    registered: Option<RegistryInstance>,
    clusters: Vec<String>,
}

impl MembershipBridge {
    pub fn new(
        properties: Arc<DiscoveryProperties>,
        connector: Arc<dyn RegistryConnector>,
        local: Option<Identity>,
    ) -> Self {
        let clusters = vec![properties.cluster_name().to_string()];
        Self {
            properties,
            connector,
            local,
            state: BridgeState::Created,
            client: None,
            registered: None,
            clusters,
        }
    }

    /// Whether this node is a full member (as opposed to a lightweight client).
    pub fn is_member(&self) -> bool {
        self.local.is_some()
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn local_identity(&self) -> Option<&Identity> {
        self.local.as_ref()
    }

    /// The instance `destroy()` will deregister, if any.
    pub fn registered_instance(&self) -> Option<&RegistryInstance> {
        self.registered.as_ref()
    }

    /// Connect to the registry and, for members, register this node.
    pub async fn start(&mut self) -> DiscoveryResult<()> {
        self.expect_state("start", BridgeState::Created)?;

        let settings = ConnectionSettings::from_properties(&self.properties)?;
        debug!(
            address = %settings.server_address,
            namespace = %settings.namespace,
            "using registry"
        );

        let client = self
            .connector
            .connect(&settings)
            .await
            .map_err(|source| unavailable("connect", source))?;
        self.client = Some(Arc::clone(&client));

        match &self.local {
            Some(identity) => {
                let instance =
                    RegistryInstance::for_member(identity, self.properties.cluster_name());
                self.registered = Some(instance.clone());
                client
                    .register(self.properties.application_name(), &instance)
                    .await
                    .map_err(|source| unavailable("register", source))?;

                info!(
                    service = %self.properties.application_name(),
                    cluster = %instance.cluster_name,
                    %identity,
                    "registered member with registry"
                );
            }
            None => {
                debug!("lightweight client; skipping registration");
            }
        }

        self.state = BridgeState::Started;
        Ok(())
    }

    /// Ask the registry for the current healthy members of this cluster.
    ///
    /// Every call is a fresh round-trip; nothing is cached between calls.
    pub async fn discover_nodes(&self) -> DiscoveryResult<MembershipSnapshot> {
        self.expect_state("discover nodes", BridgeState::Started)?;
        let client = self.client.as_ref().ok_or(DiscoveryError::InvalidState {
            operation: "discover nodes",
            state: self.state,
        })?;

        let instances = client
            .list_instances(self.properties.application_name(), &self.clusters, true)
            .await
            .map_err(|source| unavailable("discover nodes", source))?;

        let snapshot: MembershipSnapshot =
            instances.iter().map(RegistryInstance::identity).collect();
        debug!(
            service = %self.properties.application_name(),
            members = snapshot.len(),
            "discovered nodes"
        );
        Ok(snapshot)
    }

    /// Remove this node's registration.
    ///
    /// A no-op for lightweight clients and for bridges whose `start` failed
    /// before a registry client was established. A member whose register
    /// call failed is still deregistered. The bridge is destroyed even when
    /// deregistration fails.
    pub async fn destroy(&mut self) -> DiscoveryResult<()> {
        if self.state == BridgeState::Destroyed {
            return Err(DiscoveryError::InvalidState {
                operation: "destroy",
                state: self.state,
            });
        }
        self.state = BridgeState::Destroyed;

        let (Some(client), Some(instance)) = (self.client.take(), self.registered.take()) else {
            debug!("nothing registered; destroy is a no-op");
            return Ok(());
        };

        client
            .deregister(self.properties.application_name(), &instance)
            .await
            .map_err(|source| unavailable("deregister", source))?;

        info!(
            service = %self.properties.application_name(),
            ip = %instance.ip,
            port = instance.port,
            "deregistered member from registry"
        );
        Ok(())
    }

    fn expect_state(&self, operation: &'static str, expected: BridgeState) -> DiscoveryResult<()> {
        if self.state != expected {
            return Err(DiscoveryError::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }
}

fn unavailable(operation: &'static str, source: RegistryError) -> DiscoveryError {
    DiscoveryError::RegistryUnavailable { operation, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use beacon_core::Environment;
    use beacon_registry::{MemoryRegistry, Operation, RegistryResult};

    const NAMESPACE: &str = "discovery-hazelcast";
    const SERVICE: &str = "application-hazelcast-instance";

    fn props() -> Arc<DiscoveryProperties> {
        Arc::new(DiscoveryProperties::from_env(&Environment::default()).with_server_address("memory"))
    }

    fn bridge(registry: &MemoryRegistry, local: Option<Identity>) -> MembershipBridge {
        MembershipBridge::new(props(), Arc::new(registry.clone()), local)
    }

    #[tokio::test]
    async fn member_start_registers_one_instance() {
        let registry = MemoryRegistry::recording();
        let mut bridge = bridge(&registry, Some(Identity::new("10.0.0.1", 5701)));

        bridge.start().await.unwrap();

        let stored = registry.instances(NAMESPACE, SERVICE);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].ip, "10.0.0.1");
        assert_eq!(stored[0].port, 5701);
        assert_eq!(stored[0].cluster_name, "hazelcast");
        assert_eq!(stored[0].metadata.get("cluster").unwrap(), "hazelcast");
        assert_eq!(bridge.state(), BridgeState::Started);
        assert_eq!(registry.call_count(Operation::Register), 1);
    }

    #[tokio::test]
    async fn client_start_does_not_register() {
        let registry = MemoryRegistry::recording();
        let mut bridge = bridge(&registry, None);

        bridge.start().await.unwrap();

        assert!(!bridge.is_member());
        assert_eq!(registry.call_count(Operation::Register), 0);
        assert_eq!(registry.call_count(Operation::Connect), 1);
        assert!(bridge.registered_instance().is_none());
    }

    #[tokio::test]
    async fn missing_address_fails_before_any_call() {
        let registry = MemoryRegistry::recording();
        let props = Arc::new(DiscoveryProperties::from_env(&Environment::default()));
        let mut bridge =
            MembershipBridge::new(props, Arc::new(registry.clone()), Some(Identity::new("10.0.0.1", 5701)));

        let err = bridge.start().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Configuration(_)));
        assert!(registry.calls().is_empty());
        assert_eq!(bridge.state(), BridgeState::Created);
    }

    #[tokio::test]
    async fn connect_failure_is_registry_unavailable() {
        let registry = MemoryRegistry::recording();
        registry.fail(Operation::Connect);
        let mut bridge = bridge(&registry, Some(Identity::new("10.0.0.1", 5701)));

        let err = bridge.start().await.unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::RegistryUnavailable {
                operation: "connect",
                ..
            }
        ));
        assert_eq!(registry.call_count(Operation::Register), 0);
    }

    #[tokio::test]
    async fn register_failure_is_still_deregistered_on_destroy() {
        let registry = MemoryRegistry::recording();
        registry.fail(Operation::Register);
        let mut bridge = bridge(&registry, Some(Identity::new("10.0.0.1", 5701)));

        let err = bridge.start().await.unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::RegistryUnavailable {
                operation: "register",
                ..
            }
        ));
        assert_eq!(bridge.state(), BridgeState::Created);

        bridge.destroy().await.unwrap();
        assert_eq!(registry.call_count(Operation::Deregister), 1);
    }

    /// Stores the instance, then reports a timeout.
    struct TimeoutAfterStore {
        registry: MemoryRegistry,
    }

    #[async_trait]
    impl RegistryClient for TimeoutAfterStore {
        async fn register(&self, service_name: &str, instance: &RegistryInstance) -> RegistryResult<()> {
            self.registry.register_in(NAMESPACE, service_name, instance)?;
            Err(RegistryError::Timeout("register".to_string()))
        }

        async fn deregister(&self, service_name: &str, instance: &RegistryInstance) -> RegistryResult<()> {
            self.registry.deregister_in(NAMESPACE, service_name, instance)
        }

        async fn list_instances(
            &self,
            service_name: &str,
            clusters: &[String],
            healthy_only: bool,
        ) -> RegistryResult<Vec<RegistryInstance>> {
            self.registry.list_in(NAMESPACE, service_name, clusters, healthy_only)
        }
    }

    #[async_trait]
    impl RegistryConnector for TimeoutAfterStore {
        async fn connect(&self, _settings: &ConnectionSettings) -> RegistryResult<Arc<dyn RegistryClient>> {
            Ok(Arc::new(TimeoutAfterStore {
                registry: self.registry.clone(),
            }))
        }
    }

    #[tokio::test]
    async fn timed_out_registration_leaves_no_ghost_member() {
        let registry = MemoryRegistry::recording();
        let connector = TimeoutAfterStore {
            registry: registry.clone(),
        };
        let mut bridge =
            MembershipBridge::new(props(), Arc::new(connector), Some(Identity::new("10.0.0.1", 5701)));

        assert!(bridge.start().await.is_err());
        assert_eq!(registry.instances(NAMESPACE, SERVICE).len(), 1);

        bridge.destroy().await.unwrap();
        assert!(registry.instances(NAMESPACE, SERVICE).is_empty());
    }

    #[tokio::test]
    async fn discover_maps_instances_to_identities() {
        let registry = MemoryRegistry::recording();
        let mut bridge = bridge(&registry, Some(Identity::new("10.0.0.1", 5701)));
        bridge.start().await.unwrap();

        let snapshot = bridge.discover_nodes().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains(&Identity::new("10.0.0.1", 5701)));

        let calls = registry.calls();
        assert_eq!(
            calls.last().unwrap(),
            &beacon_registry::RegistryCall::ListInstances {
                namespace: NAMESPACE.to_string(),
                service: SERVICE.to_string(),
                clusters: vec!["hazelcast".to_string()],
                healthy_only: true,
            }
        );
    }

    #[tokio::test]
    async fn discover_failure_is_not_an_empty_snapshot() {
        let registry = MemoryRegistry::recording();
        let mut bridge = bridge(&registry, None);
        bridge.start().await.unwrap();
        registry.fail(Operation::ListInstances);

        let err = bridge.discover_nodes().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::RegistryUnavailable { .. }));
    }

    #[tokio::test]
    async fn discover_before_start_is_invalid_state() {
        let registry = MemoryRegistry::recording();
        let bridge = bridge(&registry, None);

        let err = bridge.discover_nodes().await.unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::InvalidState {
                state: BridgeState::Created,
                ..
            }
        ));
        assert!(registry.calls().is_empty());
    }

    #[tokio::test]
    async fn start_twice_is_invalid_state() {
        let registry = MemoryRegistry::recording();
        let mut bridge = bridge(&registry, Some(Identity::new("10.0.0.1", 5701)));
        bridge.start().await.unwrap();

        let err = bridge.start().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidState { .. }));
        assert_eq!(registry.call_count(Operation::Register), 1);
    }

    #[tokio::test]
    async fn destroy_deregisters_registered_instance() {
        let registry = MemoryRegistry::recording();
        let mut bridge = bridge(&registry, Some(Identity::new("10.0.0.1", 5701)));
        bridge.start().await.unwrap();

        bridge.destroy().await.unwrap();

        assert!(registry.instances(NAMESPACE, SERVICE).is_empty());
        assert_eq!(registry.call_count(Operation::Deregister), 1);
        assert_eq!(bridge.state(), BridgeState::Destroyed);
    }

    #[tokio::test]
    async fn destroy_on_client_makes_no_calls() {
        let registry = MemoryRegistry::recording();
        let mut bridge = bridge(&registry, None);
        bridge.start().await.unwrap();
        let before = registry.calls().len();

        bridge.destroy().await.unwrap();
        assert_eq!(registry.calls().len(), before);
    }

    #[tokio::test]
    async fn destroy_failure_is_surfaced_and_terminal() {
        let registry = MemoryRegistry::recording();
        let mut bridge = bridge(&registry, Some(Identity::new("10.0.0.1", 5701)));
        bridge.start().await.unwrap();
        registry.fail(Operation::Deregister);

        let err = bridge.destroy().await.unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::RegistryUnavailable {
                operation: "deregister",
                ..
            }
        ));
        assert_eq!(bridge.state(), BridgeState::Destroyed);

        let err = bridge.discover_nodes().await.unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::InvalidState {
                state: BridgeState::Destroyed,
                ..
            }
        ));
        assert!(matches!(
            bridge.destroy().await.unwrap_err(),
            DiscoveryError::InvalidState { .. }
        ));
    }
}
