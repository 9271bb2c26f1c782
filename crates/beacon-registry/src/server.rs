//! Dev registry server.
//!
//! Serves the naming-service HTTP API from a [`MemoryRegistry`], so nodes
//! can discover each other without an external registry during local
//! development and in tests.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/nacos/v1/ns/instance` | Register an instance |
//! | DELETE | `/nacos/v1/ns/instance` | Deregister an instance |
//! | GET | `/nacos/v1/ns/instance/list` | List instances of a service |
//! | POST | `/nacos/v1/auth/login` | Obtain an access token |

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use beacon_core::RegistryInstance;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::memory::MemoryRegistry;
use crate::nacos::{INSTANCE_LIST_PATH, INSTANCE_PATH, LOGIN_PATH};

/// Namespace used when a request carries none.
pub const DEFAULT_NAMESPACE: &str = "public";

/// Lifetime of an issued access token.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(18_000);

/// Shared state for registry handlers. Clones share the registry and the
/// issued tokens.
#[derive(Clone)]
pub struct RegistryState {
    pub registry: MemoryRegistry,
    auth: Option<Arc<Auth>>,
}

struct Auth {
    username: String,
    password: String,
    ttl: Duration,
    /// Issued token → expiry.
    tokens: Mutex<HashMap<String, Instant>>,
}

impl Auth {
    fn issue(&self) -> Result<String, getrandom::Error> {
        let mut buf = [0u8; 24];
        getrandom::getrandom(&mut buf)?;
        let token = URL_SAFE_NO_PAD.encode(buf);

        let now = Instant::now();
        let mut tokens = self.tokens.lock().expect("tokens lock");
        tokens.retain(|_, expires_at| *expires_at > now);
        tokens.insert(token.clone(), now + self.ttl);
        Ok(token)
    }

    fn is_valid(&self, token: &str) -> bool {
        self.tokens
            .lock()
            .expect("tokens lock")
            .get(token)
            .is_some_and(|expires_at| *expires_at > Instant::now())
    }
}

impl RegistryState {
    /// State with authentication disabled.
    pub fn open(registry: MemoryRegistry) -> Self {
        Self {
            registry,
            auth: None,
        }
    }

    /// State requiring a login; issued tokens expire after `ttl`.
    pub fn with_auth(registry: MemoryRegistry, username: &str, password: &str, ttl: Duration) -> Self {
        Self {
            registry,
            auth: Some(Arc::new(Auth {
                username: username.to_string(),
                password: password.to_string(),
                ttl,
                tokens: Mutex::new(HashMap::new()),
            })),
        }
    }

    /// Invalidate every issued token.
    pub fn revoke_tokens(&self) {
        if let Some(auth) = &self.auth {
            auth.tokens.lock().expect("tokens lock").clear();
        }
    }

    fn authorized(&self, access_token: Option<&str>) -> bool {
        match &self.auth {
            None => true,
            Some(auth) => access_token.is_some_and(|token| auth.is_valid(token)),
        }
    }
}

/// Build the registry router with authentication disabled.
pub fn build_router(registry: MemoryRegistry) -> Router {
    router(RegistryState::open(registry))
}

/// Build the registry router requiring a login with the given credentials.
pub fn build_router_with_auth(registry: MemoryRegistry, username: &str, password: &str) -> Router {
    router(RegistryState::with_auth(
        registry,
        username,
        password,
        DEFAULT_TOKEN_TTL,
    ))
}

/// Build the registry router over an existing state.
pub fn router(state: RegistryState) -> Router {
    Router::new()
        .route(
            INSTANCE_PATH,
            post(register_instance).delete(deregister_instance),
        )
        .route(INSTANCE_LIST_PATH, get(list_instances))
        .route(LOGIN_PATH, post(login))
        .with_state(state)
}

fn error_response(msg: &str, status: StatusCode) -> axum::response::Response {
    (status, msg.to_string()).into_response()
}

// ── Instances ──────────────────────────────────────────────────

/// Query parameters for register and deregister.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceParams {
    pub service_name: String,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub namespace_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<String>,
    #[serde(default)]
    pub healthy: Option<bool>,
    #[serde(default)]
    pub access_token: Option<String>,
}

impl InstanceParams {
    fn namespace(&self) -> &str {
        self.namespace_id
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(DEFAULT_NAMESPACE)
    }

    fn to_instance(&self) -> Result<RegistryInstance, String> {
        let metadata: HashMap<String, String> = match self.metadata.as_deref() {
            Some(raw) if !raw.is_empty() => {
                serde_json::from_str(raw).map_err(|e| format!("invalid metadata: {e}"))?
            }
            _ => HashMap::new(),
        };

        Ok(RegistryInstance {
            ip: self.ip.clone(),
            port: self.port,
            cluster_name: self.cluster_name.clone().unwrap_or_default(),
            healthy: self.healthy.unwrap_or(true),
            metadata,
        })
    }
}

/// POST /nacos/v1/ns/instance
pub async fn register_instance(
    State(state): State<RegistryState>,
    Query(params): Query<InstanceParams>,
) -> impl IntoResponse {
    if !state.authorized(params.access_token.as_deref()) {
        return error_response("unknown user or invalid token", StatusCode::FORBIDDEN);
    }

    let instance = match params.to_instance() {
        Ok(instance) => instance,
        Err(msg) => return error_response(&msg, StatusCode::BAD_REQUEST),
    };

    match state
        .registry
        .register_in(params.namespace(), &params.service_name, &instance)
    {
        Ok(()) => "ok".into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE),
    }
}

/// DELETE /nacos/v1/ns/instance
pub async fn deregister_instance(
    State(state): State<RegistryState>,
    Query(params): Query<InstanceParams>,
) -> impl IntoResponse {
    if !state.authorized(params.access_token.as_deref()) {
        return error_response("unknown user or invalid token", StatusCode::FORBIDDEN);
    }

    let instance = match params.to_instance() {
        Ok(instance) => instance,
        Err(msg) => return error_response(&msg, StatusCode::BAD_REQUEST),
    };

    match state
        .registry
        .deregister_in(params.namespace(), &params.service_name, &instance)
    {
        Ok(()) => "ok".into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE),
    }
}

/// Query parameters for instance listing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub service_name: String,
    #[serde(default)]
    pub namespace_id: Option<String>,
    #[serde(default)]
    pub clusters: Option<String>,
    #[serde(default)]
    pub healthy_only: Option<bool>,
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServiceInfoBody {
    name: String,
    clusters: String,
    hosts: Vec<HostBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HostBody {
    instance_id: String,
    ip: String,
    port: u16,
    cluster_name: String,
    service_name: String,
    healthy: bool,
    enabled: bool,
    ephemeral: bool,
    weight: f64,
    metadata: HashMap<String, String>,
}

impl HostBody {
    fn new(service_name: &str, instance: RegistryInstance) -> Self {
        Self {
            instance_id: format!(
                "{}#{}#{}#{}",
                instance.ip, instance.port, instance.cluster_name, service_name
            ),
            ip: instance.ip,
            port: instance.port,
            cluster_name: instance.cluster_name,
            service_name: service_name.to_string(),
            healthy: instance.healthy,
            enabled: true,
            ephemeral: true,
            weight: 1.0,
            metadata: instance.metadata,
        }
    }
}

/// GET /nacos/v1/ns/instance/list
pub async fn list_instances(
    State(state): State<RegistryState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    if !state.authorized(params.access_token.as_deref()) {
        return error_response("unknown user or invalid token", StatusCode::FORBIDDEN);
    }

    let namespace = params
        .namespace_id
        .as_deref()
        .filter(|ns| !ns.is_empty())
        .unwrap_or(DEFAULT_NAMESPACE);
    let clusters_raw = params.clusters.clone().unwrap_or_default();
    let clusters: Vec<String> = clusters_raw
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();

    match state.registry.list_in(
        namespace,
        &params.service_name,
        &clusters,
        params.healthy_only.unwrap_or(false),
    ) {
        Ok(instances) => {
            debug!(service = %params.service_name, count = instances.len(), "listed instances");
            Json(ServiceInfoBody {
                name: params.service_name.clone(),
                clusters: clusters_raw,
                hosts: instances
                    .into_iter()
                    .map(|i| HostBody::new(&params.service_name, i))
                    .collect(),
            })
            .into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE),
    }
}

// ── Auth ───────────────────────────────────────────────────────

/// Query parameters for login.
#[derive(Debug, Deserialize)]
pub struct LoginParams {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginBody {
    access_token: String,
    token_ttl: u64,
    global_admin: bool,
}

/// POST /nacos/v1/auth/login
pub async fn login(
    State(state): State<RegistryState>,
    Query(params): Query<LoginParams>,
) -> impl IntoResponse {
    let Some(auth) = &state.auth else {
        return Json(LoginBody {
            access_token: String::new(),
            token_ttl: DEFAULT_TOKEN_TTL.as_secs(),
            global_admin: false,
        })
        .into_response();
    };

    if params.username != auth.username || params.password != auth.password {
        return error_response("unknown user!", StatusCode::FORBIDDEN);
    }

    match auth.issue() {
        Ok(access_token) => {
            debug!(username = %params.username, "issued access token");
            Json(LoginBody {
                access_token,
                token_ttl: auth.ttl.as_secs(),
                global_admin: false,
            })
            .into_response()
        }
        Err(e) => {
            warn!(error = %e, "failed to generate access token");
            error_response("token generation failed", StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::Identity;

    fn params(ip: &str, port: u16) -> InstanceParams {
        InstanceParams {
            service_name: "svc".to_string(),
            ip: ip.to_string(),
            port,
            cluster_name: Some("hazelcast".to_string()),
            namespace_id: Some("ns".to_string()),
            metadata: Some(r#"{"cluster":"hazelcast"}"#.to_string()),
            healthy: None,
            access_token: None,
        }
    }

    fn open_state() -> RegistryState {
        RegistryState::open(MemoryRegistry::new())
    }

    fn auth_state(ttl: Duration) -> RegistryState {
        RegistryState::with_auth(MemoryRegistry::recording(), "nacos", "nacos", ttl)
    }

    async fn login_token(state: &RegistryState) -> String {
        let resp = login(
            State(state.clone()),
            Query(LoginParams {
                username: "nacos".to_string(),
                password: "nacos".to_string(),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        json["accessToken"].as_str().unwrap().to_string()
    }

    async fn register_with(state: &RegistryState, token: Option<&str>) -> StatusCode {
        let mut p = params("10.0.0.1", 5701);
        p.access_token = token.map(str::to_string);
        register_instance(State(state.clone()), Query(p))
            .await
            .into_response()
            .status()
    }

    #[tokio::test]
    async fn register_stores_instance_with_metadata() {
        let state = open_state();
        let resp = register_instance(State(state.clone()), Query(params("10.0.0.1", 5701)))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let stored = state.registry.instances("ns", "svc");
        assert_eq!(stored.len(), 1);
        assert_eq!(
            stored[0],
            RegistryInstance::for_member(&Identity::new("10.0.0.1", 5701), "hazelcast")
        );
    }

    #[tokio::test]
    async fn invalid_metadata_is_bad_request() {
        let state = open_state();
        let mut p = params("10.0.0.1", 5701);
        p.metadata = Some("not json".to_string());

        let resp = register_instance(State(state), Query(p)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn deregister_removes_instance() {
        let state = open_state();
        register_instance(State(state.clone()), Query(params("10.0.0.1", 5701))).await;
        let resp = deregister_instance(State(state.clone()), Query(params("10.0.0.1", 5701)))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.registry.instances("ns", "svc").is_empty());
    }

    #[tokio::test]
    async fn missing_namespace_uses_public() {
        let state = open_state();
        let mut p = params("10.0.0.1", 5701);
        p.namespace_id = None;

        register_instance(State(state.clone()), Query(p)).await;
        assert_eq!(state.registry.instances(DEFAULT_NAMESPACE, "svc").len(), 1);
    }

    #[tokio::test]
    async fn auth_rejects_missing_token() {
        let state = auth_state(DEFAULT_TOKEN_TTL);

        assert_eq!(register_with(&state, None).await, StatusCode::FORBIDDEN);
        assert_eq!(register_with(&state, Some("guess")).await, StatusCode::FORBIDDEN);
        assert!(state.registry.calls().is_empty());

        let token = login_token(&state).await;
        assert_eq!(register_with(&state, Some(&token)).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn login_checks_password() {
        let state = auth_state(DEFAULT_TOKEN_TTL);

        let resp = login(
            State(state.clone()),
            Query(LoginParams {
                username: "nacos".to_string(),
                password: "wrong".to_string(),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        assert!(!login_token(&state).await.is_empty());
    }

    #[tokio::test]
    async fn tokens_are_unique_per_login() {
        let state = auth_state(DEFAULT_TOKEN_TTL);
        let first = login_token(&state).await;
        let second = login_token(&state).await;

        assert_ne!(first, second);
        assert!(!first.contains("nacos"));
        assert_eq!(register_with(&state, Some(&first)).await, StatusCode::OK);
        assert_eq!(register_with(&state, Some(&second)).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let state = auth_state(Duration::from_millis(20));
        let token = login_token(&state).await;

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(register_with(&state, Some(&token)).await, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn revoked_token_is_rejected() {
        let state = auth_state(DEFAULT_TOKEN_TTL);
        let token = login_token(&state).await;

        state.revoke_tokens();

        assert_eq!(register_with(&state, Some(&token)).await, StatusCode::FORBIDDEN);
    }
}
