//! rune-bundle - OCI bundle management for Rune
//!
//! This is the CLI entry point. It drives a [`BundleManager`] directly
//! against the configured bundle and state roots.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use rune_bundle::events::EventExchange;
use rune_bundle::namespaces::{DEFAULT_NAMESPACE, NAMESPACE_ENV};
use rune_bundle::{BundleManager, Context, LifecycleNotifier, ManagerConfig};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// rune-bundle - manage OCI runtime bundles on disk
#[derive(Parser)]
#[command(name = "rune-bundle")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Create and delete OCI runtime bundles", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Manager configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Root for bundle directories
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Root for bundle working directories
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Namespace to operate in
    #[arg(short, long, global = true, env = NAMESPACE_ENV, default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Print lifecycle events as JSON lines
    #[arg(long, global = true)]
    events: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a bundle
    Create {
        /// Bundle ID
        id: String,
        /// OCI runtime spec to store as config.json ("-" for stdin)
        #[arg(short, long)]
        spec: Option<PathBuf>,
    },

    /// Delete a bundle
    #[command(name = "rm", alias = "delete")]
    Remove {
        /// Bundle ID
        id: String,
    },

    /// Show bundle paths
    Inspect {
        /// Bundle ID
        id: String,
    },

    /// List bundles in the namespace
    #[command(name = "ls", alias = "list")]
    List {
        /// Only show IDs
        #[arg(short, long)]
        quiet: bool,
    },

    /// Remove leftovers of interrupted operations
    Cleanup,
}

fn load_config(cli: &Cli) -> anyhow::Result<ManagerConfig> {
    let mut config = match &cli.config {
        Some(path) => ManagerConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None if unsafe { libc::geteuid() } == 0 => ManagerConfig::default(),
        None => ManagerConfig::user(),
    };

    if let Some(root) = &cli.root {
        config.primary_root = root.clone();
    }
    if let Some(state) = &cli.state {
        config.state_root = state.clone();
    }

    Ok(config)
}

fn read_spec(spec: Option<PathBuf>) -> anyhow::Result<Vec<u8>> {
    match spec {
        None => Ok(b"{}".to_vec()),
        Some(path) if path.as_os_str() == "-" => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("reading spec from stdin")?;
            Ok(buf)
        }
        Some(path) => {
            std::fs::read(&path).with_context(|| format!("reading spec {}", path.display()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli)?;
    let exchange = Arc::new(EventExchange::new(config.event_capacity));
    let manager = BundleManager::new(config)?.with_notifier(exchange.clone());
    let ctx = Context::new().with_namespace(cli.namespace.clone());

    let printer = if cli.events {
        let mut subscription = exchange.subscribe(&[])?;
        Some(tokio::spawn(async move {
            while let Some(envelope) = subscription.recv().await {
                let event: serde_json::Value =
                    serde_json::from_slice(&envelope.event).unwrap_or(serde_json::Value::Null);
                println!(
                    "{}",
                    serde_json::json!({
                        "timestamp": envelope.timestamp,
                        "namespace": envelope.namespace,
                        "topic": envelope.topic,
                        "event": event,
                    })
                );
            }
        }))
    } else {
        None
    };

    match cli.command {
        Commands::Create { id, spec } => {
            let spec = read_spec(spec)?;
            let bundle = manager
                .create(&ctx, &id, &spec)
                .with_context(|| format!("creating bundle {}", id))?;
            println!("{}", bundle.path.display());
        }

        Commands::Remove { id } => {
            let bundle = manager.load(&ctx, &id)?;
            manager
                .delete(&bundle)
                .with_context(|| format!("deleting bundle {}", id))?;
            println!("{}", id);
        }

        Commands::Inspect { id } => {
            let bundle = manager.open(&ctx, &id)?;
            let work = std::fs::read_link(bundle.work_link()).ok();
            let info = serde_json::json!({
                "id": bundle.id,
                "namespace": bundle.namespace,
                "path": bundle.path,
                "rootfs": bundle.rootfs(),
                "config": bundle.config_path(),
                "work": work,
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::List { quiet } => {
            let bundles = manager.list(&ctx)?;

            if quiet {
                for b in bundles {
                    println!("{}", b.id);
                }
            } else {
                println!("{:<24} {:<16} {:<50}", "BUNDLE ID", "NAMESPACE", "PATH");
                for b in bundles {
                    println!(
                        "{:<24} {:<16} {:<50}",
                        b.id,
                        b.namespace,
                        b.path.display()
                    );
                }
            }
        }

        Commands::Cleanup => {
            for path in manager.cleanup(&ctx)? {
                println!("{}", path.display());
            }
        }
    }

    // Closing every sender ends the subscription
    drop(manager);
    drop(exchange);
    if let Some(printer) = printer {
        printer.await?;
    }

    Ok(())
}
