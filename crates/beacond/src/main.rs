//! beacond — the Beacon daemon.
//!
//! One binary, three modes:
//! - `registry` serves a development service registry over HTTP
//! - `node` joins a cluster through the registry and keeps polling it
//! - `members` prints the current cluster membership once
//!
//! # Usage
//!
//! ```text
//! beacond registry --port 8848
//! REGISTRY_SERVER_ADDR=127.0.0.1:8848 beacond node --host 10.0.0.1 --port 5701 --cache users
//! beacond members --config beacon.toml
//! ```

mod members;
mod node_mode;
mod registry_mode;

use std::path::Path;

use beacon_core::{DiscoveryProperties, Environment};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,beacond=debug,beacon=debug";

#[derive(Parser)]
#[command(name = "beacond", about = "Beacon registry-backed cluster discovery daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a development registry serving the registry HTTP API.
    Registry {
        /// Port to listen on.
        #[arg(long, default_value = "8848")]
        port: u16,

        /// Require login with this username.
        #[arg(long, requires = "password")]
        username: Option<String>,

        /// Password for `--username`.
        #[arg(long, requires = "username")]
        password: Option<String>,
    },

    /// Run a cluster node that registers with the registry and polls membership.
    Node(node_mode::NodeArgs),

    /// Print current cluster members as JSON and exit.
    Members {
        /// Path to a beacon.toml config file.
        #[arg(long)]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Registry {
            port,
            username,
            password,
        } => registry_mode::run_registry(port, username.zip(password)).await,
        Command::Node(args) => node_mode::run_node(args).await,
        Command::Members { config } => members::print_members(config.as_deref()).await,
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Resolve discovery properties from an optional config file and the
/// process environment.
fn load_properties(config: Option<&Path>) -> anyhow::Result<DiscoveryProperties> {
    let properties = DiscoveryProperties::load(config, &Environment::from_process())?;
    tracing::debug!(?properties, "resolved discovery properties");
    Ok(properties)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn node_args_parse() {
        let cli = Cli::try_parse_from([
            "beacond", "node", "--host", "10.0.0.1", "--port", "5701", "--cache", "users",
            "--cache", "orders",
        ])
        .unwrap();

        match cli.command {
            Command::Node(args) => {
                assert_eq!(args.host, "10.0.0.1");
                assert_eq!(args.port, 5701);
                assert!(!args.lite);
                assert_eq!(args.interval, 5);
                assert_eq!(args.cache, vec!["users", "orders"]);
            }
            _ => panic!("expected node command"),
        }
    }

    #[test]
    fn registry_defaults_to_8848() {
        let cli = Cli::try_parse_from(["beacond", "--log-json", "registry"]).unwrap();
        assert!(cli.log_json);
        assert!(matches!(
            cli.command,
            Command::Registry {
                port: 8848,
                username: None,
                password: None
            }
        ));
    }

    #[test]
    fn registry_username_requires_password() {
        assert!(Cli::try_parse_from(["beacond", "registry", "--username", "nacos"]).is_err());
    }

    #[test]
    fn properties_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[registry]\nserver_address = \"10.0.0.9:8848\"\ncluster_name = \"blue\""
        )
        .unwrap();

        let props = load_properties(Some(file.path())).unwrap();
        assert_eq!(props.server_address(), Some("10.0.0.9:8848"));
        assert_eq!(props.cluster_name(), "blue");
    }

    #[test]
    fn bad_config_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cache]\neviction_policy = \"fifo\"").unwrap();
        assert!(load_properties(Some(file.path())).is_err());
    }
}
