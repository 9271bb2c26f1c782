//! In-process registry.
//!
//! Stores instances per `(namespace, service)`. A registry built with
//! [`MemoryRegistry::recording`] also keeps a log of every call made
//! against it, so tests can assert on exactly which registry operations a
//! component issued; the dev registry server uses [`MemoryRegistry::new`],
//! which keeps no log. Individual operations can be switched into a
//! failing mode to simulate an unreachable registry.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use beacon_core::RegistryInstance;
use tracing::debug;

use crate::client::{ConnectionSettings, RegistryClient, RegistryConnector};
use crate::error::{RegistryError, RegistryResult};

/// A registry operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    Register,
    Deregister,
    ListInstances,
}

/// One recorded call against the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryCall {
    Connect {
        namespace: String,
    },
    Register {
        namespace: String,
        service: String,
        instance: RegistryInstance,
    },
    Deregister {
        namespace: String,
        service: String,
        instance: RegistryInstance,
    },
    ListInstances {
        namespace: String,
        service: String,
        clusters: Vec<String>,
        healthy_only: bool,
    },
}

impl RegistryCall {
    pub fn operation(&self) -> Operation {
        match self {
            RegistryCall::Connect { .. } => Operation::Connect,
            RegistryCall::Register { .. } => Operation::Register,
            RegistryCall::Deregister { .. } => Operation::Deregister,
            RegistryCall::ListInstances { .. } => Operation::ListInstances,
        }
    }
}

type ServiceKey = (String, String);

#[derive(Default)]
struct Inner {
    services: RwLock<HashMap<ServiceKey, Vec<RegistryInstance>>>,
    recording: bool,
    calls: Mutex<Vec<RegistryCall>>,
    failing: Mutex<HashSet<Operation>>,
}

/// Shared in-memory registry. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    inner: Arc<Inner>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that logs every call, for [`MemoryRegistry::calls`].
    pub fn recording() -> Self {
        Self {
            inner: Arc::new(Inner {
                recording: true,
                ..Inner::default()
            }),
        }
    }

    /// Make every subsequent `op` fail with [`RegistryError::Unavailable`].
    pub fn fail(&self, op: Operation) {
        self.inner.failing.lock().expect("failing lock").insert(op);
    }

    /// Undo a previous [`MemoryRegistry::fail`].
    pub fn recover(&self, op: Operation) {
        self.inner.failing.lock().expect("failing lock").remove(&op);
    }

    /// All calls issued so far, in order. Always empty unless built with
    /// [`MemoryRegistry::recording`].
    pub fn calls(&self) -> Vec<RegistryCall> {
        self.inner.calls.lock().expect("calls lock").clone()
    }

    /// Number of calls of kind `op` issued so far.
    pub fn call_count(&self, op: Operation) -> usize {
        self.inner
            .calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|c| c.operation() == op)
            .count()
    }

    /// Every instance currently stored for `service` in `namespace`.
    pub fn instances(&self, namespace: &str, service: &str) -> Vec<RegistryInstance> {
        let services = self.inner.services.read().expect("services lock");
        services
            .get(&(namespace.to_string(), service.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Flip the health flag of a stored instance. Returns whether it was found.
    pub fn set_healthy(
        &self,
        namespace: &str,
        service: &str,
        ip: &str,
        port: u16,
        healthy: bool,
    ) -> bool {
        let mut services = self.inner.services.write().expect("services lock");
        let Some(instances) = services.get_mut(&(namespace.to_string(), service.to_string()))
        else {
            return false;
        };

        let mut found = false;
        for instance in instances.iter_mut().filter(|i| i.ip == ip && i.port == port) {
            instance.healthy = healthy;
            found = true;
        }
        found
    }

    /// A client bound to `namespace`.
    pub fn client(&self, namespace: &str) -> MemoryRegistryClient {
        MemoryRegistryClient {
            registry: self.clone(),
            namespace: namespace.to_string(),
        }
    }

    /// Insert or replace an instance.
    pub fn register_in(
        &self,
        namespace: &str,
        service: &str,
        instance: &RegistryInstance,
    ) -> RegistryResult<()> {
        self.record(RegistryCall::Register {
            namespace: namespace.to_string(),
            service: service.to_string(),
            instance: instance.clone(),
        });
        self.check(Operation::Register)?;

        let mut services = self.inner.services.write().expect("services lock");
        let entry = services
            .entry((namespace.to_string(), service.to_string()))
            .or_default();
        entry.retain(|existing| !existing.same_endpoint(instance));
        entry.push(instance.clone());

        debug!(namespace, service, ip = %instance.ip, port = instance.port, "memory registry: registered");
        Ok(())
    }

    /// Remove an instance. Removing an absent instance succeeds.
    pub fn deregister_in(
        &self,
        namespace: &str,
        service: &str,
        instance: &RegistryInstance,
    ) -> RegistryResult<()> {
        self.record(RegistryCall::Deregister {
            namespace: namespace.to_string(),
            service: service.to_string(),
            instance: instance.clone(),
        });
        self.check(Operation::Deregister)?;

        let mut services = self.inner.services.write().expect("services lock");
        if let Some(entry) = services.get_mut(&(namespace.to_string(), service.to_string())) {
            entry.retain(|existing| !existing.same_endpoint(instance));
        }

        debug!(namespace, service, ip = %instance.ip, port = instance.port, "memory registry: deregistered");
        Ok(())
    }

    /// Query instances with the cluster and health filters applied.
    pub fn list_in(
        &self,
        namespace: &str,
        service: &str,
        clusters: &[String],
        healthy_only: bool,
    ) -> RegistryResult<Vec<RegistryInstance>> {
        self.record(RegistryCall::ListInstances {
            namespace: namespace.to_string(),
            service: service.to_string(),
            clusters: clusters.to_vec(),
            healthy_only,
        });
        self.check(Operation::ListInstances)?;

        let services = self.inner.services.read().expect("services lock");
        let instances = services
            .get(&(namespace.to_string(), service.to_string()))
            .map(|entry| {
                entry
                    .iter()
                    .filter(|i| clusters.is_empty() || clusters.contains(&i.cluster_name))
                    .filter(|i| !healthy_only || i.healthy)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(instances)
    }

    fn record(&self, call: RegistryCall) {
        if !self.inner.recording {
            return;
        }
        self.inner.calls.lock().expect("calls lock").push(call);
    }

    fn check(&self, op: Operation) -> RegistryResult<()> {
        if self.inner.failing.lock().expect("failing lock").contains(&op) {
            return Err(RegistryError::Unavailable(format!("{op:?} disabled")));
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryConnector for MemoryRegistry {
    async fn connect(&self, settings: &ConnectionSettings) -> RegistryResult<Arc<dyn RegistryClient>> {
        self.record(RegistryCall::Connect {
            namespace: settings.namespace.clone(),
        });
        self.check(Operation::Connect)?;
        Ok(Arc::new(self.client(&settings.namespace)))
    }
}

/// A [`MemoryRegistry`] handle bound to one namespace.
#[derive(Clone)]
pub struct MemoryRegistryClient {
    registry: MemoryRegistry,
    namespace: String,
}

#[async_trait]
impl RegistryClient for MemoryRegistryClient {
    async fn register(&self, service_name: &str, instance: &RegistryInstance) -> RegistryResult<()> {
        self.registry.register_in(&self.namespace, service_name, instance)
    }

    async fn deregister(
        &self,
        service_name: &str,
        instance: &RegistryInstance,
    ) -> RegistryResult<()> {
        self.registry
            .deregister_in(&self.namespace, service_name, instance)
    }

    async fn list_instances(
        &self,
        service_name: &str,
        clusters: &[String],
        healthy_only: bool,
    ) -> RegistryResult<Vec<RegistryInstance>> {
        self.registry
            .list_in(&self.namespace, service_name, clusters, healthy_only)
    }
}
