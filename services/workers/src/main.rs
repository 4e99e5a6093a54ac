//! cover worker process.
//!
//! Every instance of the cover deployment runs this binary alongside the
//! web app. It hosts two loops:
//!
//! - **Singleton scheduler**: fleet-leader-gated periodic jobs (reporting)
//! - **Queue worker**: leader-independent queue consumption
//!
//! Leadership is re-derived from the fleet registry on every tick; this
//! process keeps no leadership state, so instances can come and go
//! without any handover.

use std::sync::Arc;

use anyhow::Result;
use cover_fleet::{
    FleetRegistryClient, InstanceIdentity, LeadershipOracle, ManagedIdentityCredential,
    TokenCredential,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod queue;
mod scheduler;
mod worker;

use queue::WorkQueue;
use scheduler::SingletonScheduler;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting cover workers");

    // Load configuration
    let config = config::Config::from_env()?;
    info!(
        registry_url = %config.registry_url,
        tick_interval_secs = config.tick_interval.as_secs(),
        queue_backoff_ms = config.queue_backoff.as_millis() as u64,
        "Configuration loaded"
    );

    // Deployment identity is resolved exactly once. A process that cannot
    // determine its coordinates never becomes leader, but keeps running:
    // the queue worker does not depend on identity.
    let identity = match InstanceIdentity::from_env() {
        Ok(identity) => {
            info!(
                site_name = %identity.site_name,
                instance_id = %identity.instance_id,
                "Deployment identity resolved"
            );
            Some(identity)
        }
        Err(e) => {
            warn!(
                error = %e,
                "Deployment identity unavailable; singleton tasks disabled on this instance"
            );
            None
        }
    };

    let credential: Option<Arc<dyn TokenCredential>> = match ManagedIdentityCredential::from_env()
    {
        Some(credential) => Some(Arc::new(credential)),
        None => {
            info!("No managed identity endpoint; querying the registry unauthenticated");
            None
        }
    };
    let registry = Arc::new(FleetRegistryClient::new(&config.registry_url, credential));
    let oracle = Arc::new(LeadershipOracle::new(identity, registry));

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Register singleton tasks and start the scheduler
    let mut singleton = SingletonScheduler::new(Arc::clone(&oracle));
    singleton.register("reporting", config.tick_interval, || async {
        info!("Running reporting");
        Ok(())
    });
    let scheduler_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { singleton.run(shutdown_rx).await }
    });

    // Start the queue worker loop
    let work_queue: Arc<dyn WorkQueue> = match &config.queue_url {
        Some(url) => Arc::new(queue::HttpWorkQueue::new(url)),
        None => {
            info!("No queue endpoint configured; using in-memory queue");
            Arc::new(queue::InMemoryQueue::new())
        }
    };
    let worker_handle = tokio::spawn({
        let work_queue = Arc::clone(&work_queue);
        let backoff = config.queue_backoff;
        let shutdown_rx = shutdown_rx.clone();
        async move {
            worker::run_worker_loop(work_queue, Arc::new(worker::LogHandler), backoff, shutdown_rx)
                .await
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = scheduler_handle => {
            match result {
                Ok(()) => info!("Scheduler exited"),
                Err(e) => error!(error = %e, "Scheduler task panicked"),
            }
        }
        _ = worker_handle => {
            info!("Queue worker exited");
        }
    }

    // Signal shutdown to both loops
    let _ = shutdown_tx.send(true);

    // Give in-flight work time to finish
    info!("Waiting for workers to shut down...");
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    info!("cover workers shutdown complete");
    Ok(())
}
