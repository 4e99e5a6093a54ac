//! Queue worker loop.
//!
//! Runs on every instance with no leader gate: the external queue is
//! responsible for safe concurrent consumption. The loop claims one item
//! at a time and backs off when the queue is empty; a processing failure
//! never terminates it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::queue::{WorkItem, WorkQueue};

/// Handler for claimed work items.
#[async_trait]
pub trait WorkHandler: Send + Sync {
    /// Process one item.
    ///
    /// An error leaves the item uncompleted; the queue redelivers it per
    /// its own policy.
    async fn process(&self, item: WorkItem) -> anyhow::Result<()>;
}

/// Handler that records each claimed item; concrete jobs plug in here.
pub struct LogHandler;

#[async_trait]
impl WorkHandler for LogHandler {
    async fn process(&self, item: WorkItem) -> anyhow::Result<()> {
        info!(item_id = %item.id, "Work item received");
        Ok(())
    }
}

/// Run the worker loop until shutdown.
///
/// Suspends only at the queue call and at the backoff sleep; no new
/// fetch starts after the shutdown signal is observed.
pub async fn run_worker_loop(
    queue: Arc<dyn WorkQueue>,
    handler: Arc<dyn WorkHandler>,
    backoff: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(backoff_ms = backoff.as_millis() as u64, "Starting queue worker loop");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match queue.fetch_one().await {
            Ok(Some(item)) => {
                let item_id = item.id.clone();
                debug!(item_id = %item_id, "Processing work item");

                match handler.process(item.clone()).await {
                    Ok(()) => {
                        if let Err(e) = queue.complete(&item).await {
                            warn!(item_id = %item_id, error = %e, "Failed to complete work item");
                        }
                    }
                    Err(e) => {
                        // The item stays uncompleted; redelivery is the
                        // queue's decision.
                        error!(item_id = %item_id, error = %e, "Work item processing failed");
                    }
                }
            }
            Ok(None) => {
                debug!("Queue empty; backing off");
                sleep_or_shutdown(backoff, &mut shutdown).await;
            }
            Err(e) => {
                warn!(error = %e, "Queue fetch failed; backing off");
                sleep_or_shutdown(backoff, &mut shutdown).await;
            }
        }
    }

    info!("Queue worker loop shutting down");
}

async fn sleep_or_shutdown(backoff: Duration, shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(backoff) => {}
        _ = shutdown.changed() => {}
    }
}
