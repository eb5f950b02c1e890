//! Node autoscaler service.
//!
//! Watches for pods the scheduler cannot place for lack of CPU or memory and
//! grows the matching ACK node pool:
//! - Discovers the cluster id and region from the cluster itself
//! - Batches unschedulable pods by count or interval
//! - Waits for the node pool to settle before each scale-out

use std::sync::Arc;
use std::time::Duration;

use ack_cloud::{Ack, NodePoolProvider};
use anyhow::{Context, Result};
use autoscaler::nodes::{discover_cluster_id, discover_region};
use autoscaler::{
    BatchTrigger, Config, EventWatcher, KubeNodeDirectory, LogFormat, PendingStore,
    ScaleCoordinator,
};
use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_directive()));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

async fn kube_client(config: &Config) -> Result<Client> {
    let Some(path) = &config.kubeconfig else {
        return Client::try_default()
            .await
            .context("Failed to infer Kubernetes client config");
    };

    let kubeconfig = Kubeconfig::read_from(path)
        .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
    let client_config =
        kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context("Failed to load kubeconfig")?;
    Client::try_from(client_config).context("Failed to build Kubernetes client")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::parse();
    init_tracing(&config);

    config.validate()?;
    info!(config = ?config, "Starting node autoscaler");

    let client = kube_client(&config).await?;
    let cluster_id = discover_cluster_id(client.clone())
        .await
        .context("Failed to discover cluster id")?;
    let region = discover_region(client.clone())
        .await
        .context("Failed to discover region")?;

    let provider: Arc<dyn NodePoolProvider> = Arc::new(
        Ack::new(
            config.access_key_id.clone(),
            config.access_key_secret.clone(),
            region,
        )
        .context("Failed to create ACK client")?,
    );

    let store = Arc::new(PendingStore::new());
    let shutdown = CancellationToken::new();
    let (batch_tx, batch_rx) = mpsc::channel(config.batch_queue_capacity);

    let watcher = EventWatcher::new(Arc::clone(&store));
    let trigger = BatchTrigger::new(
        Arc::clone(&store),
        batch_tx,
        config.trigger_threshold,
        config.trigger_interval,
    );
    let coordinator = ScaleCoordinator::new(
        Arc::clone(&store),
        provider,
        Arc::new(KubeNodeDirectory::new(client.clone())),
        cluster_id,
        config.memory_standard,
        shutdown.clone(),
    )
    .with_poll_interval(config.poll_interval)
    .with_cooldown(config.cooldown);

    let tasks = vec![
        tokio::spawn({
            let shutdown = shutdown.clone();
            let resync = config.resync;
            async move { watcher.run(client, resync, shutdown).await }
        }),
        tokio::spawn(trigger.run(shutdown.clone())),
        tokio::spawn(coordinator.run(batch_rx)),
    ];

    shutdown_signal().await;
    shutdown.cancel();

    let joined = tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(tasks)).await;
    match joined {
        Ok(results) => {
            for result in results {
                if let Err(e) = result {
                    error!(error = %e, "Task failed during shutdown");
                }
            }
        }
        Err(_) => warn!("Tasks did not stop within the grace period"),
    }

    info!(tracked = store.len(), "Node autoscaler stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }
}
