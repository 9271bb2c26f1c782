//! `beacond members` — one-shot membership query.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use beacon_core::MembershipSnapshot;
use beacon_discovery::MembershipBridge;
use beacon_registry::NacosConnector;

/// Discover the current members as a lightweight client and print them.
pub async fn print_members(config: Option<&Path>) -> anyhow::Result<()> {
    let properties = Arc::new(crate::load_properties(config)?);
    let mut bridge = MembershipBridge::new(
        Arc::clone(&properties),
        Arc::new(NacosConnector::new()),
        None,
    );

    bridge.start().await.context("connect to registry")?;
    let snapshot = bridge.discover_nodes().await;
    bridge.destroy().await?;
    let snapshot = snapshot.context("discover members")?;

    let output = render(properties.application_name(), properties.cluster_name(), &snapshot);
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn render(service: &str, cluster: &str, snapshot: &MembershipSnapshot) -> serde_json::Value {
    let mut members: Vec<String> = snapshot.iter().map(ToString::to_string).collect();
    members.sort();
    serde_json::json!({
        "service": service,
        "cluster": cluster,
        "members": members,
    })
}
