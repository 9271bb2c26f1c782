//! Naming-service HTTP client.
//!
//! Speaks the open HTTP API of a Nacos-compatible naming service:
//!
//! | Method | Path | Purpose |
//! |---|---|---|
//! | POST | `/nacos/v1/ns/instance` | register an instance |
//! | DELETE | `/nacos/v1/ns/instance` | deregister an instance |
//! | GET | `/nacos/v1/ns/instance/list` | list instances of a service |
//! | POST | `/nacos/v1/auth/login` | exchange username/password for a token |
//!
//! All parameters travel in the query string. When several comma-separated
//! addresses are configured they are tried in order; the client only moves
//! on to the next one when the connection itself fails.
//!
//! A login token is renewed once 90% of its advertised TTL has passed, and
//! a request rejected as unauthorized is retried once after a fresh login.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use beacon_core::RegistryInstance;
use hmac::{Hmac, Mac};
use reqwest::Method;
use serde::Deserialize;
use sha1::Sha1;
use tracing::{debug, info, warn};

use crate::client::{ConnectionSettings, DEFAULT_TIMEOUT, RegistryClient, RegistryConnector};
use crate::error::{RegistryError, RegistryResult};

pub const INSTANCE_PATH: &str = "/nacos/v1/ns/instance";
pub const INSTANCE_LIST_PATH: &str = "/nacos/v1/ns/instance/list";
pub const LOGIN_PATH: &str = "/nacos/v1/auth/login";

type Params = Vec<(&'static str, String)>;

struct AccessToken {
    value: String,
    /// `None` when the registry advertised no TTL.
    refresh_at: Option<Instant>,
}

impl AccessToken {
    fn new(value: String, token_ttl: u64) -> Self {
        let refresh_at =
            (token_ttl > 0).then(|| Instant::now() + Duration::from_secs(token_ttl).mul_f64(0.9));
        Self { value, refresh_at }
    }

    fn is_stale(&self) -> bool {
        self.refresh_at.is_some_and(|at| Instant::now() >= at)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
    #[serde(default)]
    token_ttl: u64,
}

#[derive(Debug, Deserialize)]
struct ServiceInfo {
    #[serde(default)]
    hosts: Vec<HostEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HostEntry {
    ip: String,
    port: u16,
    #[serde(default)]
    cluster_name: String,
    #[serde(default = "default_true")]
    healthy: bool,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl From<HostEntry> for RegistryInstance {
    fn from(host: HostEntry) -> Self {
        RegistryInstance {
            ip: host.ip,
            port: host.port,
            cluster_name: host.cluster_name,
            healthy: host.healthy,
            metadata: host.metadata,
        }
    }
}

/// Client for a naming service's open HTTP API.
pub struct NacosClient {
    http: reqwest::Client,
    endpoints: Vec<String>,
    settings: ConnectionSettings,
    access_token: RwLock<Option<AccessToken>>,
}

impl NacosClient {
    /// Build a client. Performs no I/O.
    pub fn new(settings: ConnectionSettings) -> RegistryResult<Self> {
        let endpoints: Vec<String> = settings
            .addresses()
            .into_iter()
            .map(endpoint_url)
            .collect();
        if endpoints.is_empty() {
            return Err(RegistryError::NoAddress);
        }

        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| RegistryError::Connect {
                address: settings.server_address.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            http,
            endpoints,
            settings,
            access_token: RwLock::new(None),
        })
    }

    /// Exchange the configured username/password for an access token.
    ///
    /// A no-op when no username is configured.
    pub async fn login(&self) -> RegistryResult<()> {
        let Some(username) = self.settings.username.clone() else {
            return Ok(());
        };
        let password = self.settings.password.clone().unwrap_or_default();

        let body = self
            .send(
                Method::POST,
                LOGIN_PATH,
                vec![("username", username.clone()), ("password", password)],
            )
            .await?;
        let login: LoginResponse =
            serde_json::from_str(&body).map_err(|e| RegistryError::Decode(e.to_string()))?;

        *self.access_token.write().expect("token lock") =
            Some(AccessToken::new(login.access_token, login.token_ttl));
        info!(%username, token_ttl = login.token_ttl, "logged in to registry");
        Ok(())
    }

    /// The endpoints this client talks to, in failover order.
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    fn auth_params(&self, service_name: &str) -> RegistryResult<Params> {
        let mut params = Params::new();

        if let Some(token) = self.access_token.read().expect("token lock").as_ref() {
            params.push(("accessToken", token.value.clone()));
        }

        if let (Some(ak), Some(sk)) = (&self.settings.access_key, &self.settings.secret_key) {
            let data = sign_data(epoch_millis(), service_name);
            let signature = sign(sk, &data)?;
            params.push(("ak", ak.clone()));
            params.push(("data", data));
            params.push(("signature", signature));
        }

        Ok(params)
    }

    fn needs_login(&self) -> bool {
        self.settings.username.is_some()
            && self
                .access_token
                .read()
                .expect("token lock")
                .as_ref()
                .is_none_or(AccessToken::is_stale)
    }

    /// Send an authenticated request, renewing the token when it is due and
    /// once more when the registry rejects it.
    async fn call(
        &self,
        method: Method,
        path: &str,
        service_name: &str,
        params: Params,
    ) -> RegistryResult<String> {
        if self.needs_login() {
            debug!("access token due for renewal");
            self.login().await?;
        }

        let mut request = params.clone();
        request.extend(self.auth_params(service_name)?);
        match self.send(method.clone(), path, request).await {
            Err(RegistryError::Unauthorized(body)) if self.settings.username.is_some() => {
                warn!(%body, "registry rejected access token, logging in again");
                self.login().await?;
                let mut retry = params;
                retry.extend(self.auth_params(service_name)?);
                self.send(method, path, retry).await
            }
            other => other,
        }
    }

    async fn send(&self, method: Method, path: &str, params: Params) -> RegistryResult<String> {
        let mut last_error = RegistryError::NoAddress;

        for endpoint in &self.endpoints {
            let url = format!("{endpoint}{path}");
            debug!(%method, %url, "registry request");

            let response = match self
                .http
                .request(method.clone(), &url)
                .query(&params)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) if e.is_connect() => {
                    debug!(%url, error = %e, "registry endpoint unreachable, trying next");
                    last_error = RegistryError::Connect {
                        address: endpoint.clone(),
                        message: e.to_string(),
                    };
                    continue;
                }
                Err(e) if e.is_timeout() => return Err(RegistryError::Timeout(url)),
                Err(e) => {
                    return Err(RegistryError::Connect {
                        address: endpoint.clone(),
                        message: e.to_string(),
                    });
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| RegistryError::Decode(e.to_string()))?;

            if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
            {
                return Err(RegistryError::Unauthorized(body));
            }
            if !status.is_success() {
                return Err(RegistryError::Http {
                    status: status.as_u16(),
                    body,
                });
            }
            return Ok(body);
        }

        Err(last_error)
    }

    fn instance_params(&self, service_name: &str, instance: &RegistryInstance) -> Params {
        vec![
            ("serviceName", service_name.to_string()),
            ("ip", instance.ip.clone()),
            ("port", instance.port.to_string()),
            ("clusterName", instance.cluster_name.clone()),
            ("namespaceId", self.settings.namespace.clone()),
            ("ephemeral", "true".to_string()),
        ]
    }
}

#[async_trait]
impl RegistryClient for NacosClient {
    async fn register(&self, service_name: &str, instance: &RegistryInstance) -> RegistryResult<()> {
        let mut params = self.instance_params(service_name, instance);
        let metadata = serde_json::to_string(&instance.metadata)
            .map_err(|e| RegistryError::Decode(e.to_string()))?;
        params.push(("metadata", metadata));
        params.push(("healthy", instance.healthy.to_string()));
        params.push(("enabled", "true".to_string()));
        params.push(("weight", "1.0".to_string()));

        self.call(Method::POST, INSTANCE_PATH, service_name, params).await?;
        debug!(service = service_name, ip = %instance.ip, port = instance.port, "instance registered");
        Ok(())
    }

    async fn deregister(
        &self,
        service_name: &str,
        instance: &RegistryInstance,
    ) -> RegistryResult<()> {
        let params = self.instance_params(service_name, instance);

        self.call(Method::DELETE, INSTANCE_PATH, service_name, params).await?;
        debug!(service = service_name, ip = %instance.ip, port = instance.port, "instance deregistered");
        Ok(())
    }

    async fn list_instances(
        &self,
        service_name: &str,
        clusters: &[String],
        healthy_only: bool,
    ) -> RegistryResult<Vec<RegistryInstance>> {
        let params = vec![
            ("serviceName", service_name.to_string()),
            ("namespaceId", self.settings.namespace.clone()),
            ("clusters", clusters.join(",")),
            ("healthyOnly", healthy_only.to_string()),
        ];

        let body = self
            .call(Method::GET, INSTANCE_LIST_PATH, service_name, params)
            .await?;
        let info: ServiceInfo =
            serde_json::from_str(&body).map_err(|e| RegistryError::Decode(e.to_string()))?;

        Ok(info.hosts.into_iter().map(RegistryInstance::from).collect())
    }
}

/// Connects [`NacosClient`]s, logging in when credentials are present.
#[derive(Debug, Clone)]
pub struct NacosConnector {
    timeout: Duration,
}

impl NacosConnector {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the per-request timeout of connected clients.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for NacosConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistryConnector for NacosConnector {
    async fn connect(&self, settings: &ConnectionSettings) -> RegistryResult<Arc<dyn RegistryClient>> {
        let client = NacosClient::new(settings.clone().with_timeout(self.timeout))?;
        client.login().await?;
        info!(
            endpoints = ?client.endpoints(),
            namespace = %settings.namespace,
            "registry client established"
        );
        Ok(Arc::new(client))
    }
}

fn endpoint_url(address: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

fn sign_data(millis: u128, service_name: &str) -> String {
    if service_name.is_empty() {
        millis.to_string()
    } else {
        format!("{millis}@@{service_name}")
    }
}

/// base64(HMAC-SHA1(secret, data)).
fn sign(secret_key: &str, data: &str) -> RegistryResult<String> {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret_key.as_bytes())
        .map_err(|e| RegistryError::Unauthorized(e.to_string()))?;
    mac.update(data.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_adds_scheme() {
        assert_eq!(endpoint_url("127.0.0.1:8848"), "http://127.0.0.1:8848");
        assert_eq!(endpoint_url("https://reg.local/"), "https://reg.local");
    }

    #[test]
    fn new_rejects_empty_address() {
        let err = NacosClient::new(ConnectionSettings::new(" , ", "public")).err().unwrap();
        assert!(matches!(err, RegistryError::NoAddress));
    }

    #[test]
    fn new_keeps_address_order() {
        let client =
            NacosClient::new(ConnectionSettings::new("10.0.0.1:8848,10.0.0.2:8848", "public"))
                .unwrap();
        assert_eq!(
            client.endpoints(),
            &["http://10.0.0.1:8848".to_string(), "http://10.0.0.2:8848".to_string()]
        );
    }

    #[test]
    fn token_without_ttl_never_goes_stale() {
        assert!(!AccessToken::new("t".to_string(), 0).is_stale());
        assert!(!AccessToken::new("t".to_string(), 18_000).is_stale());
    }

    #[test]
    fn token_is_stale_past_refresh_point() {
        let token = AccessToken {
            value: "t".to_string(),
            refresh_at: Some(Instant::now()),
        };
        assert!(token.is_stale());
    }

    #[test]
    fn sign_data_includes_service_name() {
        assert_eq!(sign_data(1000, "svc"), "1000@@svc");
        assert_eq!(sign_data(1000, ""), "1000");
    }

    #[test]
    fn signature_matches_rfc2202_vector() {
        // RFC 2202 test case 2 for HMAC-SHA1.
        let signature = sign("Jefe", "what do ya want for nothing?").unwrap();
        let expected = STANDARD.encode([
            0xef, 0xfc, 0xdf, 0x6a, 0xe5, 0xeb, 0x2f, 0xa2, 0xd2, 0x74, 0x16, 0xd5, 0xf1, 0x84,
            0xdf, 0x9c, 0x25, 0x9a, 0x7c, 0x79,
        ]);
        assert_eq!(signature, expected);
    }

    #[test]
    fn auth_params_sign_with_keys() {
        let client = NacosClient::new(
            ConnectionSettings::new("127.0.0.1:8848", "public").with_keys("ak-1", "sk-1"),
        )
        .unwrap();

        let params = client.auth_params("svc").unwrap();
        let keys: Vec<&str> = params.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["ak", "data", "signature"]);
        assert!(params[1].1.ends_with("@@svc"));
    }

    #[test]
    fn host_entry_defaults() {
        let info: ServiceInfo =
            serde_json::from_str(r#"{"hosts":[{"ip":"10.0.0.1","port":5701}]}"#).unwrap();
        let instance = RegistryInstance::from(info.hosts.into_iter().next().unwrap());
        assert!(instance.healthy);
        assert!(instance.cluster_name.is_empty());
        assert!(instance.metadata.is_empty());
    }
}
