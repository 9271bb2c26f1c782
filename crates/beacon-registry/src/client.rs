//! Registry client and connector seams.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::{ConfigResult, DiscoveryProperties, RegistryInstance};

use crate::error::RegistryResult;

/// Default per-request timeout for registry calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Parameters for establishing a registry client.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// One or more `host:port` endpoints, comma-separated.
    pub server_address: String,
    pub namespace: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub timeout: Duration,
}

impl ConnectionSettings {
    pub fn new(server_address: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            server_address: server_address.into(),
            namespace: namespace.into(),
            username: None,
            password: None,
            access_key: None,
            secret_key: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Derive settings from resolved properties.
    ///
    /// Fails when no registry address is configured.
    pub fn from_properties(props: &DiscoveryProperties) -> ConfigResult<Self> {
        let address = props.require_server_address()?;
        Ok(Self {
            server_address: address.to_string(),
            namespace: props.namespace().to_string(),
            username: props.username().map(str::to_string),
            password: props.password().map(str::to_string),
            access_key: props.access_key().map(str::to_string),
            secret_key: props.secret_key().map(str::to_string),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Builder method: set username/password credentials.
    pub fn with_credentials(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            ..self
        }
    }

    /// Builder method: set access-key/secret-key signing credentials.
    pub fn with_keys(self, access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: Some(access_key.into()),
            secret_key: Some(secret_key.into()),
            ..self
        }
    }

    /// Builder method: set the per-request timeout.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// The individual endpoints of `server_address`, in order.
    pub fn addresses(&self) -> Vec<&str> {
        self.server_address
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .collect()
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("server_address", &self.server_address)
            .field("namespace", &self.namespace)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Naming operations offered by the service registry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Publish `instance` under `service_name`.
    async fn register(&self, service_name: &str, instance: &RegistryInstance) -> RegistryResult<()>;

    /// Remove `instance` from `service_name`.
    async fn deregister(&self, service_name: &str, instance: &RegistryInstance)
    -> RegistryResult<()>;

    /// List the instances of `service_name` whose cluster is in `clusters`
    /// (all clusters when empty), optionally only the healthy ones.
    async fn list_instances(
        &self,
        service_name: &str,
        clusters: &[String],
        healthy_only: bool,
    ) -> RegistryResult<Vec<RegistryInstance>>;
}

/// Establishes registry clients from connection settings.
#[async_trait]
pub trait RegistryConnector: Send + Sync {
    async fn connect(&self, settings: &ConnectionSettings) -> RegistryResult<Arc<dyn RegistryClient>>;
}
