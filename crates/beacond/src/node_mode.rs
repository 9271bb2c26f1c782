//! Node mode — a cluster node that finds its peers through the registry.
//!
//! In this mode, the daemon:
//! 1. Resolves discovery properties (config file, environment, defaults)
//! 2. Starts a membership bridge, registering unless `--lite`
//! 3. Brings up the local runtime and registers one map config per `--cache`
//! 4. Polls the registry every `--interval` seconds and logs membership changes
//! 5. On Ctrl-C, deregisters and exits

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use beacon_cache::LocalRuntimeFactory;
use beacon_core::{Identity, MembershipSnapshot};
use beacon_discovery::{
    CacheConfigRegistry, ClusterConfig, DiscoveryStrategyFactory, MembershipBridge,
};
use beacon_registry::{NacosConnector, RegistryConnector};
use tracing::{debug, info, warn};

#[derive(clap::Args)]
pub struct NodeArgs {
    /// Address other members reach this node on.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Cluster port of this node.
    #[arg(long, default_value = "5701")]
    pub port: u16,

    /// Discover members without registering this node.
    #[arg(long)]
    pub lite: bool,

    /// Path to a beacon.toml config file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Membership poll interval in seconds.
    #[arg(long, default_value = "5")]
    pub interval: u64,

    /// Cache id to configure on startup. Repeatable.
    #[arg(long)]
    pub cache: Vec<String>,
}

/// Run a node until Ctrl-C.
pub async fn run_node(args: NodeArgs) -> anyhow::Result<()> {
    let properties = Arc::new(crate::load_properties(args.config.as_deref())?);

    // ── Discovery ────────────────────────────────────────────────
    let connector: Arc<dyn RegistryConnector> = Arc::new(NacosConnector::new());
    let factory = Arc::new(DiscoveryStrategyFactory::new(
        Arc::clone(&properties),
        connector,
    ));
    for definition in factory.configuration_properties() {
        debug!(
            key = definition.key,
            optional = definition.optional,
            value = definition.value.as_deref().unwrap_or("<unset>"),
            "discovery property"
        );
    }

    let identity = (!args.lite).then(|| Identity::new(args.host.clone(), args.port));
    let mut bridge = factory.new_strategy(identity);

    let caches = CacheConfigRegistry::new(
        ClusterConfig::for_discovery(Arc::clone(&factory)),
        LocalRuntimeFactory::new(),
    );
    let setup = || -> anyhow::Result<()> {
        for id in &args.cache {
            let runtime = caches.get_or_create(id)?;
            let map = runtime.map(id);
            info!(cache = %id, capacity = ?map.capacity(), "cache ready");
        }
        Ok(())
    };

    info!(
        service = %properties.application_name(),
        cluster = %properties.cluster_name(),
        "starting node"
    );
    let interval = Duration::from_secs(args.interval.max(1));
    run_until_shutdown(&mut bridge, setup, interval, tokio::signal::ctrl_c()).await?;
    info!("node stopped");
    Ok(())
}

/// Start the bridge, run `setup`, then poll until `shutdown` resolves.
///
/// The bridge is destroyed however this ends. The first error wins.
async fn run_until_shutdown<S, F>(
    bridge: &mut MembershipBridge,
    setup: S,
    interval: Duration,
    shutdown: F,
) -> anyhow::Result<()>
where
    S: FnOnce() -> anyhow::Result<()>,
    F: Future<Output = std::io::Result<()>>,
{
    let outcome = async {
        bridge.start().await.context("start membership bridge")?;
        info!(member = bridge.is_member(), "node started");
        setup()?;
        poll_members(bridge, interval, shutdown).await
    }
    .await;

    let teardown = bridge.destroy().await.context("destroy membership bridge");
    match (outcome, teardown) {
        (Err(e), Err(destroy_err)) => {
            warn!(error = %destroy_err, "destroy after failure also failed");
            Err(e)
        }
        (outcome, teardown) => outcome.and(teardown),
    }
}

async fn poll_members<F>(
    bridge: &MembershipBridge,
    interval: Duration,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = std::io::Result<()>>,
{
    let mut ticker = tokio::time::interval(interval);
    let mut last = MembershipSnapshot::default();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match bridge.discover_nodes().await {
                    Ok(snapshot) => {
                        if snapshot != last {
                            log_change(&last, &snapshot);
                            last = snapshot;
                        }
                    }
                    Err(e) => warn!(error = %e, "membership poll failed"),
                }
            }
            res = &mut shutdown => {
                res.context("listen for shutdown signal")?;
                info!("shutdown signal received");
                return Ok(());
            }
        }
    }
}

fn log_change(previous: &MembershipSnapshot, current: &MembershipSnapshot) {
    for joined in current.iter().filter(|m| !previous.contains(m)) {
        info!(member = %joined, "member joined");
    }
    for left in previous.iter().filter(|m| !current.contains(m)) {
        info!(member = %left, "member left");
    }
    info!(members = current.len(), "membership changed");
}
