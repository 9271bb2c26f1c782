//! HTTP client integration tests.
//!
//! Runs `NacosClient` against the dev registry server bound to an
//! ephemeral local port.

use std::net::SocketAddr;
use std::time::Duration;

use beacon_core::{Identity, RegistryInstance};
use beacon_registry::server::{
    DEFAULT_TOKEN_TTL, RegistryState, build_router, build_router_with_auth, router,
};
use beacon_registry::{
    ConnectionSettings, MemoryRegistry, NacosClient, NacosConnector, Operation, RegistryClient,
    RegistryConnector, RegistryError,
};

async fn spawn(router: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// An address nothing listens on.
async fn dead_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

fn member(ip: &str, port: u16) -> RegistryInstance {
    RegistryInstance::for_member(&Identity::new(ip, port), "hazelcast")
}

#[tokio::test]
async fn register_list_deregister_over_http() {
    let registry = MemoryRegistry::recording();
    let addr = spawn(build_router(registry.clone())).await;

    let settings = ConnectionSettings::new(addr.to_string(), "discovery-hazelcast");
    let client = NacosConnector::new().connect(&settings).await.unwrap();

    client.register("orders", &member("10.0.0.1", 5701)).await.unwrap();
    client.register("orders", &member("10.0.0.2", 5701)).await.unwrap();

    let stored = registry.instances("discovery-hazelcast", "orders");
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].metadata.get("cluster").unwrap(), "hazelcast");

    let listed = client
        .list_instances("orders", &["hazelcast".to_string()], true)
        .await
        .unwrap();
    let mut ips: Vec<String> = listed.iter().map(|i| i.ip.clone()).collect();
    ips.sort();
    assert_eq!(ips, vec!["10.0.0.1", "10.0.0.2"]);

    client.deregister("orders", &member("10.0.0.1", 5701)).await.unwrap();
    let listed = client.list_instances("orders", &[], true).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].ip, "10.0.0.2");
}

#[tokio::test]
async fn healthy_only_is_forwarded() {
    let registry = MemoryRegistry::recording();
    let addr = spawn(build_router(registry.clone())).await;
    let client = NacosClient::new(ConnectionSettings::new(addr.to_string(), "ns")).unwrap();

    client.register("svc", &member("10.0.0.1", 5701)).await.unwrap();
    client.register("svc", &member("10.0.0.2", 5701)).await.unwrap();
    registry.set_healthy("ns", "svc", "10.0.0.2", 5701, false);

    assert_eq!(client.list_instances("svc", &[], true).await.unwrap().len(), 1);
    assert_eq!(client.list_instances("svc", &[], false).await.unwrap().len(), 2);
}

#[tokio::test]
async fn server_side_failure_surfaces_as_http_error() {
    let registry = MemoryRegistry::recording();
    let addr = spawn(build_router(registry.clone())).await;
    let client = NacosClient::new(ConnectionSettings::new(addr.to_string(), "ns")).unwrap();

    registry.fail(Operation::ListInstances);
    let err = client.list_instances("svc", &[], true).await.unwrap_err();
    match err {
        RegistryError::Http { status, .. } => assert_eq!(status, 503),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn login_token_is_used_for_calls() {
    let registry = MemoryRegistry::recording();
    let addr = spawn(build_router_with_auth(registry.clone(), "nacos", "s3cret")).await;

    let settings = ConnectionSettings::new(addr.to_string(), "ns").with_credentials("nacos", "s3cret");
    let client = NacosConnector::new().connect(&settings).await.unwrap();

    client.register("svc", &member("10.0.0.1", 5701)).await.unwrap();
    assert_eq!(registry.instances("ns", "svc").len(), 1);
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let registry = MemoryRegistry::recording();
    let addr = spawn(build_router_with_auth(registry, "nacos", "s3cret")).await;

    let settings = ConnectionSettings::new(addr.to_string(), "ns").with_credentials("nacos", "nope");
    let err = NacosConnector::new().connect(&settings).await.err().unwrap();
    assert!(matches!(err, RegistryError::Unauthorized(_)));
}

#[tokio::test]
async fn expiring_token_is_renewed_before_use() {
    let registry = MemoryRegistry::new();
    let state = RegistryState::with_auth(registry.clone(), "nacos", "s3cret", Duration::from_secs(1));
    let addr = spawn(router(state)).await;

    let settings = ConnectionSettings::new(addr.to_string(), "ns").with_credentials("nacos", "s3cret");
    let client = NacosConnector::new().connect(&settings).await.unwrap();
    client.register("svc", &member("10.0.0.1", 5701)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1200)).await;

    client.register("svc", &member("10.0.0.2", 5701)).await.unwrap();
    assert_eq!(client.list_instances("svc", &[], true).await.unwrap().len(), 2);
}

#[tokio::test]
async fn rejected_token_triggers_one_login_retry() {
    let registry = MemoryRegistry::new();
    let state = RegistryState::with_auth(registry.clone(), "nacos", "s3cret", DEFAULT_TOKEN_TTL);
    let addr = spawn(router(state.clone())).await;

    let settings = ConnectionSettings::new(addr.to_string(), "ns").with_credentials("nacos", "s3cret");
    let client = NacosConnector::new().connect(&settings).await.unwrap();

    state.revoke_tokens();

    client.register("svc", &member("10.0.0.1", 5701)).await.unwrap();
    assert_eq!(registry.instances("ns", "svc").len(), 1);
}

#[tokio::test]
async fn calls_without_login_are_rejected() {
    let registry = MemoryRegistry::recording();
    let addr = spawn(build_router_with_auth(registry.clone(), "nacos", "s3cret")).await;
    let client = NacosClient::new(ConnectionSettings::new(addr.to_string(), "ns")).unwrap();

    let err = client.register("svc", &member("10.0.0.1", 5701)).await.unwrap_err();
    assert!(matches!(err, RegistryError::Unauthorized(_)));
    assert!(registry.calls().is_empty());
}

#[tokio::test]
async fn fails_over_to_next_address() {
    let registry = MemoryRegistry::recording();
    let live = spawn(build_router(registry.clone())).await;
    let dead = dead_addr().await;

    let client =
        NacosClient::new(ConnectionSettings::new(format!("{dead},{live}"), "ns")).unwrap();
    client.register("svc", &member("10.0.0.1", 5701)).await.unwrap();

    assert_eq!(registry.instances("ns", "svc").len(), 1);
}

#[tokio::test]
async fn unreachable_registry_is_connect_error() {
    let dead = dead_addr().await;
    let client = NacosClient::new(ConnectionSettings::new(dead.to_string(), "ns")).unwrap();

    let err = client.list_instances("svc", &[], true).await.unwrap_err();
    assert!(matches!(err, RegistryError::Connect { .. }));
}
