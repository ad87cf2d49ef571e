use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use clusterlink_config::AppConfig;
use clusterlink_core::{EventRelay, KubeAccessProbe, KubeWatchConnector, Orchestrator, OrchestratorSettings};
use tracing::info;

/// Keeps a local cluster proxy and per-context namespace watches in line with
/// the active kubeconfig, printing every update as a JSON line.
#[derive(Debug, Parser)]
#[command(name = "clusterlink", version)]
struct Args {
    /// Kubeconfig to use instead of $KUBECONFIG and the stored setting
    #[arg(long, value_name = "PATH")]
    kubeconfig: Option<PathBuf>,

    /// Settings file to load instead of the default location
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Proxy executable, overriding `[proxy] binary`
    #[arg(long, value_name = "BIN")]
    proxy_binary: Option<String>,

    /// Write the default settings file and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    if args.init_config {
        let path = AppConfig::init_default()?;
        eprintln!("Wrote default config to {}", path.display());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load(),
    };
    if let Some(binary) = args.proxy_binary {
        config.proxy.binary = binary;
    }

    let settings = OrchestratorSettings::from_config(&config, args.kubeconfig);
    let (relay, mut messages) = EventRelay::channel();
    let handle = Orchestrator::spawn(settings, Arc::new(KubeWatchConnector), Arc::new(KubeAccessProbe), relay);

    loop {
        tokio::select! {
            message = messages.recv() => match message {
                Some(message) => println!("{}", serde_json::to_string(&message)?),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    handle.shutdown().await
}
