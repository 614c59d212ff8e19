use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::keccak256;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, BatchPolicy, ChainPair};
use crate::error::{AggregatorError, StoreError};
use crate::message::{CrossChainMessage, Status};
use crate::queue::{Delivery, DurableQueue};
use crate::relayer::{Outcome, Relayer};
use crate::store::{BatchRecord, BatchState, Store, StoreStats};

/// Shared durable-queue consumer group every aggregator tick acquires
/// deliveries from; dispatch retries ride the same group's redelivery clock.
const CONSUMER_GROUP: &str = "aggregator-dispatch";
const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(500);
const RETRY_BACKOFF_CAP: Duration = Duration::from_secs(30);

fn retry_backoff(attempts: u32) -> Duration {
    let shift = attempts.saturating_sub(1).min(16);
    (RETRY_BACKOFF_BASE * 2u32.saturating_pow(shift)).min(RETRY_BACKOFF_CAP)
}

/// A message claimed into the current batch, paired with the queue delivery
/// that must be ack'd, nak'd, or terminated once its outcome is known. `None`
/// for messages the orphan sweep in `accumulate` pulled straight from the
/// store without ever going through the queue.
struct BatchItem {
    message: CrossChainMessage,
    delivery: Option<Delivery>,
}

/// In-memory state the aggregator keeps for the batch currently being
/// accumulated (or dispatched) for one chain-pair. Owned exclusively by the
/// aggregator; external readers only ever see a `StoreStats` snapshot.
struct PairState {
    batch_id: String,
    state: BatchState,
    items: Vec<BatchItem>,
    any_failed: bool,
}

impl PairState {
    fn new(batch_id: String) -> Self {
        Self {
            batch_id,
            state: BatchState::Accumulating,
            items: Vec::new(),
            any_failed: false,
        }
    }

    fn oldest_age(&self) -> Duration {
        self.items
            .first()
            .map(|i| (Utc::now() - i.message.timestamp).to_std().unwrap_or_default())
            .unwrap_or_default()
    }
}

/// A pair's batch-in-progress plus the dispatch clock, which must outlive
/// any single batch to enforce `min_submission_interval` across dispatches.
#[derive(Default)]
struct PairSlot {
    current: Option<PairState>,
    last_dispatch_at: Option<Instant>,
}

fn derive_batch_id(source: &str, destination: &str, created_at: chrono::DateTime<Utc>) -> String {
    let mut preimage = Vec::new();
    preimage.extend_from_slice(source.as_bytes());
    preimage.push(b':');
    preimage.extend_from_slice(destination.as_bytes());
    preimage.push(b':');
    preimage.extend_from_slice(created_at.timestamp_nanos_opt().unwrap_or_default().to_be_bytes().as_slice());
    format!("batch_{}", hex::encode(keccak256(preimage)))
}

/// Batch aggregator (C5): one independent state machine per `(source,
/// destination)` pair, ticked on an interval and serialized per pair by an
/// async mutex so different pairs progress fully in parallel.
pub struct Aggregator {
    pairs: DashMap<ChainPair, Arc<AsyncMutex<PairSlot>>>,
    store: Arc<dyn Store>,
    queue: Arc<dyn DurableQueue>,
    relayer: Arc<dyn Relayer>,
    cfg: AppConfig,
}

impl Aggregator {
    pub fn new(cfg: AppConfig, store: Arc<dyn Store>, queue: Arc<dyn DurableQueue>, relayer: Arc<dyn Relayer>) -> Self {
        let pairs = DashMap::new();
        for pair in active_pairs(&cfg) {
            pairs.insert(pair, Arc::new(AsyncMutex::new(PairSlot::default())));
        }
        Self { pairs, store, queue, relayer, cfg }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.cfg.aggregator.tick_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {}
            }

            let mut handles = Vec::with_capacity(self.pairs.len());
            for entry in self.pairs.iter() {
                let pair = entry.key().clone();
                let lock = entry.value().clone();
                let policy = self.cfg.policy_for(&pair);
                let max_retries = self.cfg.queue.max_retries;
                let store = self.store.clone();
                let queue = self.queue.clone();
                let relayer = self.relayer.clone();
                handles.push(tokio::spawn(async move {
                    let mut guard = lock.lock().await;
                    if let Err(e) = tick_pair(&pair, &policy, max_retries, &mut guard, &store, &queue, &relayer).await {
                        tracing::warn!(source = %pair.source, destination = %pair.destination, error = %e, "aggregator tick failed");
                    }
                }));
            }
            for handle in handles {
                let _ = handle.await;
            }

            if let Ok(stats) = self.store.get_batch_stats().await {
                crate::metrics::observe_store_stats(&stats);
            }
        }
    }

    /// Snapshot-copy accessor; never holds a pair lock across the call.
    pub async fn stats(&self) -> Result<StoreStats, AggregatorError> {
        Ok(self.store.get_batch_stats().await.map_err(AggregatorError::Store)?)
    }
}

fn active_pairs(cfg: &AppConfig) -> Vec<ChainPair> {
    let enabled: Vec<&str> = cfg.chains.iter().filter(|c| c.enabled).map(|c| c.name.as_str()).collect();
    let mut pairs = Vec::new();
    for source in &enabled {
        for destination in &enabled {
            if source != destination {
                pairs.push(ChainPair {
                    source: source.to_string(),
                    destination: destination.to_string(),
                });
            }
        }
    }
    pairs
}

async fn tick_pair(
    pair: &ChainPair,
    policy: &BatchPolicy,
    max_retries: u32,
    slot: &mut PairSlot,
    store: &Arc<dyn Store>,
    queue: &Arc<dyn DurableQueue>,
    relayer: &Arc<dyn Relayer>,
) -> Result<(), StoreError> {
    if slot.current.is_none() {
        let created_at = Utc::now();
        let batch_id = derive_batch_id(&pair.source, &pair.destination, created_at);
        store
            .insert_batch(&BatchRecord {
                batch_id: batch_id.clone(),
                source: pair.source.clone(),
                destination: pair.destination.clone(),
                state: BatchState::Accumulating,
                created_at,
                dispatched_at: None,
                message_count: 0,
                total_value: rust_decimal::Decimal::ZERO,
            })
            .await?;
        slot.current = Some(PairState::new(batch_id));
    }
    let pair_state = slot.current.as_mut().expect("just initialized above");

    if matches!(pair_state.state, BatchState::Accumulating) {
        accumulate(pair, policy, pair_state, store, queue).await?;

        let size = pair_state.items.len();
        let oldest_age = pair_state.oldest_age();
        let ready = size >= policy.max_batch_size
            || (size >= policy.min_batch_size && oldest_age >= policy.max_wait_time)
            || (size >= 1 && oldest_age >= policy.max_wait_time);
        if ready {
            pair_state.state = BatchState::Ready;
        }
    }

    if matches!(pair_state.state, BatchState::Ready) {
        let interval_ok = slot
            .last_dispatch_at
            .map(|last| last.elapsed() >= policy.min_submission_interval)
            .unwrap_or(true);
        if interval_ok {
            let pair_state = slot.current.as_mut().expect("checked above");
            store.update_batch_state(&pair_state.batch_id, BatchState::Dispatched, Some(Utc::now())).await?;
            for item in &pair_state.items {
                store.update_status(&item.message.id, Status::Submitted, None, None, None).await?;
            }
            crate::metrics::AGGREGATOR_BATCHES_DISPATCHED
                .with_label_values(&[&pair.source, &pair.destination])
                .inc();
            pair_state.state = BatchState::Dispatched;
            slot.last_dispatch_at = Some(Instant::now());
        }
    }

    if matches!(pair_state.state, BatchState::Dispatched) {
        let resolved = attempt_relay(pair, max_retries, pair_state, store, queue, relayer).await?;
        if resolved {
            slot.current = None;
        }
    }

    Ok(())
}

/// Primary discovery is the shared queue group; `list_pending` only backfills
/// rows a listener or a manual fixup left `Queued` without a matching queue
/// delivery (e.g. a fixed-up row, or a delivery this process never saw).
async fn accumulate(
    pair: &ChainPair,
    policy: &BatchPolicy,
    pair_state: &mut PairState,
    store: &Arc<dyn Store>,
    queue: &Arc<dyn DurableQueue>,
) -> Result<(), StoreError> {
    let capacity = policy.max_batch_size.saturating_sub(pair_state.items.len());
    if capacity == 0 {
        return Ok(());
    }

    for _ in 0..capacity {
        let Some(delivery) = queue.next(CONSUMER_GROUP).await? else { break };
        if delivery.message.source_chain != pair.source || delivery.message.destination_chain != pair.destination {
            // Belongs to a different pair's traffic on the shared group;
            // release immediately so that pair's own tick can pick it up.
            let _ = queue.nak(&delivery, Duration::ZERO).await;
            continue;
        }

        let id = delivery.message.id.clone();
        match store.claim_for_batch(&[id.clone()], &pair_state.batch_id).await {
            Ok(winners) if winners.iter().any(|w| w == &id) => {
                let mut claimed = delivery.message.clone();
                claimed.status = Status::Batched;
                claimed.batch_id = Some(pair_state.batch_id.clone());
                pair_state.items.push(BatchItem { message: claimed, delivery: Some(delivery) });
            }
            Ok(_) => {
                // Already claimed by a concurrent tick, or no longer
                // `Queued`; this delivery has nothing left to contribute.
                let _ = queue.ack(&delivery).await;
            }
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "claim failed for queue-delivered message");
                let _ = queue.nak(&delivery, Duration::from_secs(5)).await;
            }
        }
    }

    let remaining = policy.max_batch_size.saturating_sub(pair_state.items.len());
    if remaining > 0 {
        let candidates = store.list_pending(&pair.source, &pair.destination, remaining as u64).await?;
        if !candidates.is_empty() {
            let mut by_id: HashMap<String, CrossChainMessage> = candidates.into_iter().map(|m| (m.id.clone(), m)).collect();
            let ids: Vec<String> = by_id.keys().cloned().collect();
            let winners = store.claim_for_batch(&ids, &pair_state.batch_id).await?;
            for id in winners {
                if let Some(mut msg) = by_id.remove(&id) {
                    msg.status = Status::Batched;
                    msg.batch_id = Some(pair_state.batch_id.clone());
                    pair_state.items.push(BatchItem { message: msg, delivery: None });
                }
            }
        }
    }

    pair_state
        .items
        .sort_by(|a, b| a.message.timestamp.cmp(&b.message.timestamp).then_with(|| a.message.id.cmp(&b.message.id)));
    Ok(())
}

/// Runs one relay round over whatever is still unresolved in `pair_state`.
/// Returns `true` once every item has reached a terminal outcome and the
/// batch has been finalized; `false` means some items are still retrying and
/// `tick_pair` will call this again on a later tick.
async fn attempt_relay(
    pair: &ChainPair,
    max_retries: u32,
    pair_state: &mut PairState,
    store: &Arc<dyn Store>,
    queue: &Arc<dyn DurableQueue>,
    relayer: &Arc<dyn Relayer>,
) -> Result<bool, StoreError> {
    if pair_state.items.is_empty() {
        let final_state = if pair_state.any_failed { BatchState::Failed } else { BatchState::Acknowledged };
        store.update_batch_state(&pair_state.batch_id, final_state, Some(Utc::now())).await?;
        return Ok(true);
    }

    let messages: Vec<CrossChainMessage> = pair_state.items.iter().map(|i| i.message.clone()).collect();
    let outcomes = relayer.submit(&messages).await;
    let outcomes_by_id: HashMap<String, Outcome> = outcomes.into_iter().map(|o| (o.message_id, o.outcome)).collect();

    let mut remaining = Vec::new();
    for item in pair_state.items.drain(..) {
        let id = item.message.id.clone();
        match outcomes_by_id.get(&id) {
            Some(Outcome::Confirmed) => {
                store.update_status(&id, Status::Confirmed, None, None, None).await?;
                if let Some(delivery) = &item.delivery {
                    let _ = queue.ack(delivery).await;
                }
                crate::metrics::AGGREGATOR_MESSAGES_CONFIRMED
                    .with_label_values(&[&pair.source, &pair.destination])
                    .inc();
            }
            Some(Outcome::Failed { reason }) => {
                let attempts = item.message.attempts + 1;
                if attempts >= max_retries {
                    if let Some(delivery) = &item.delivery {
                        let _ = queue.terminate(delivery).await;
                    }
                    store.update_status(&id, Status::Failed, None, Some(reason), Some(attempts)).await?;
                    pair_state.any_failed = true;
                    crate::metrics::AGGREGATOR_MESSAGES_FAILED
                        .with_label_values(&[&pair.source, &pair.destination])
                        .inc();
                } else {
                    if let Some(delivery) = &item.delivery {
                        let _ = queue.nak(delivery, retry_backoff(attempts)).await;
                    }
                    tracing::warn!(id = %id, attempts, error = %reason, "relay attempt failed, will retry");
                    let mut retried = item.message;
                    retried.attempts = attempts;
                    remaining.push(BatchItem { message: retried, delivery: None });
                }
            }
            None => {
                // Relayer had nothing to say about this message this round;
                // leave it unresolved and retry on the next tick.
                remaining.push(item);
            }
        }
    }
    pair_state.items = remaining;

    if pair_state.items.is_empty() {
        let final_state = if pair_state.any_failed { BatchState::Failed } else { BatchState::Acknowledged };
        store.update_batch_state(&pair_state.batch_id, final_state, Some(Utc::now())).await?;
        Ok(true)
    } else {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainFamily;
    use std::time::Duration as StdDuration;

    fn chain(name: &str, enabled: bool) -> crate::config::ChainConfig {
        crate::config::ChainConfig {
            name: name.to_string(),
            family: ChainFamily::Evm,
            chain_id: 1,
            rpc_endpoints: vec!["http://localhost:8545".to_string()],
            bridge_contract: "0xbridge".to_string(),
            start_block: 0,
            confirmation_depth: 12,
            poll_interval: StdDuration::from_secs(10),
            max_reorg_depth: 20,
            enabled,
            block_time: StdDuration::from_secs(12),
        }
    }

    #[test]
    fn active_pairs_excludes_disabled_and_self_pairs() {
        let cfg = crate::config::AppConfig {
            environment: "development".to_string(),
            chains: vec![chain("ethereum", true), chain("avalanche", true), chain("solana", false)],
            queue: crate::config::QueueConfig {
                urls: vec!["nats://localhost:4222".to_string()],
                stream_name: "s".to_string(),
                subject: "subj".to_string(),
                max_retries: 5,
                ack_wait: StdDuration::from_secs(30),
                backlog_threshold: 10_000,
            },
            database: crate::config::DatabaseConfig {
                dsn: "postgres://localhost/test".to_string(),
                pool_size: 10,
            },
            relayer: Default::default(),
            aggregator: Default::default(),
        };
        let pairs = active_pairs(&cfg);
        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().all(|p| p.source != "solana" && p.destination != "solana"));
    }

    #[test]
    fn derive_batch_id_is_deterministic_for_same_timestamp() {
        let ts = Utc::now();
        let a = derive_batch_id("ethereum", "avalanche", ts);
        let b = derive_batch_id("ethereum", "avalanche", ts);
        assert_eq!(a, b);
        assert_ne!(a, derive_batch_id("avalanche", "ethereum", ts));
    }

    #[test]
    fn retry_backoff_is_bounded_and_increasing() {
        assert_eq!(retry_backoff(1), RETRY_BACKOFF_BASE);
        assert!(retry_backoff(2) > retry_backoff(1));
        assert_eq!(retry_backoff(20), RETRY_BACKOFF_CAP);
    }
}
