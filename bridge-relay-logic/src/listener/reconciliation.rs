use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::QueueError;
use crate::message::Status;
use crate::queue::DurableQueue;
use crate::store::Store;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
const RECONCILE_BATCH_SIZE: u64 = 500;

/// Periodically re-publishes messages stuck in `Detected`.
///
/// The listener's own publish path already retries with backoff before
/// giving up; this task is the backstop for everything that still fell
/// through (process restarts mid-publish, a queue outage that outlasted the
/// retry budget, the bounded-channel drop path in `process_chunk`).
pub async fn reconciliation_task(store: Arc<dyn Store>, queue: Arc<dyn DurableQueue>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(DEFAULT_INTERVAL) => {}
        }
        if let Err(e) = run_once(&store, &queue).await {
            tracing::warn!(error = %e, "reconciliation pass failed");
        }
    }
}

async fn run_once(store: &Arc<dyn Store>, queue: &Arc<dyn DurableQueue>) -> anyhow::Result<()> {
    let stuck = store.list_detected(RECONCILE_BATCH_SIZE).await?;
    if stuck.is_empty() {
        return Ok(());
    }
    tracing::info!(count = stuck.len(), "reconciling stuck messages");

    for msg in stuck {
        match queue.publish(&msg).await {
            Ok(()) => {
                store.update_status(&msg.id, Status::Queued, None, None, None).await?;
            }
            Err(QueueError::Backlog { depth, threshold }) => {
                tracing::warn!(depth, threshold, "queue backlog above threshold, pausing reconciliation");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(id = %msg.id, error = %e, "reconciliation publish failed, will retry next pass");
            }
        }
    }
    Ok(())
}
