mod reconciliation;

pub use reconciliation::reconciliation_task;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chain::{decode_bridge_event_for, ChainClient};
use crate::config::ChainConfig;
use crate::error::QueueError;
use crate::message::{CrossChainMessage, MessageKind, Status};
use crate::queue::DurableQueue;
use crate::store::{Cursor, LockRecord, Store};

const DEFAULT_CHUNK_SIZE: u64 = 100;
const OUTBOUND_CHANNEL_CAPACITY: usize = 100;
const PUBLISH_MAX_RETRIES: u32 = 5;
const PUBLISH_BACKOFF_BASE: Duration = Duration::from_millis(500);
const PUBLISH_BACKOFF_CAP: Duration = Duration::from_secs(30);
/// Grace period after a rewind before an orphaned event's message is marked Expired (§9 scenario 3).
const REORG_GRACE_PERIOD: Duration = Duration::from_secs(600);

/// One instance per enabled source chain. Owns the persisted cursor and is
/// the exclusive writer of `Detected -> Queued` for its chain.
pub struct Listener {
    cfg: ChainConfig,
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn Store>,
    queue: Arc<dyn DurableQueue>,
    cancel: CancellationToken,
}

impl Listener {
    pub fn new(cfg: ChainConfig, chain: Arc<dyn ChainClient>, store: Arc<dyn Store>, queue: Arc<dyn DurableQueue>, cancel: CancellationToken) -> Self {
        Self { cfg, chain, store, queue, cancel }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel::<CrossChainMessage>(OUTBOUND_CHANNEL_CAPACITY);

        // The event-processor task is the listener's own bounded-channel
        // consumer; it exists purely to decouple "decode and enqueue" from
        // "persist and publish" the way §4.2's backpressure model requires.
        let store = self.store.clone();
        let queue = self.queue.clone();
        let processor_cancel = self.cancel.clone();
        let processor = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = processor_cancel.cancelled() => break,
                    maybe_msg = rx.recv() => {
                        match maybe_msg {
                            Some(msg) => persist_and_publish(&store, &queue, msg).await,
                            None => break,
                        }
                    }
                }
            }
        });

        let result = self.poll_loop(tx).await;
        processor.abort();
        result
    }

    async fn poll_loop(&self, tx: mpsc::Sender<CrossChainMessage>) -> anyhow::Result<()> {
        let mut last_block = self.load_or_init_cursor().await?;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.cfg.poll_interval) => {}
            }

            let latest = match self.chain.latest_block().await {
                Ok(h) => h,
                Err(e) => {
                    tracing::warn!(chain = %self.cfg.name, error = %e, "latest_block failed, will retry next tick");
                    continue;
                }
            };
            let safe = latest.saturating_sub(self.cfg.confirmation_depth);
            crate::metrics::LISTENER_BLOCKS_BEHIND
                .with_label_values(&[&self.cfg.name])
                .set(safe.saturating_sub(last_block.0) as f64);
            if last_block.0 > safe {
                continue;
            }

            if let Some(rewound) = self.detect_reorg(last_block.0).await? {
                last_block = rewound;
                continue;
            }

            let mut cursor = last_block.0;
            while cursor <= safe {
                if self.cancel.is_cancelled() {
                    return Ok(());
                }
                let chunk_end = (cursor + DEFAULT_CHUNK_SIZE - 1).min(safe);
                self.process_chunk(cursor, chunk_end, &tx).await?;

                let block = self.chain.block(chunk_end).await.ok();
                let hash = block.map(|b| b.hash).unwrap_or_default();
                self.store
                    .save_cursor(&self.cfg.name, &Cursor { last_block: chunk_end, last_block_hash: hash.clone() })
                    .await?;
                last_block = (chunk_end, hash);
                cursor = chunk_end + 1;
            }
        }
    }

    async fn load_or_init_cursor(&self) -> anyhow::Result<(u64, String)> {
        match self.store.load_cursor(&self.cfg.name).await? {
            Some(c) => Ok((c.last_block, c.last_block_hash)),
            None => Ok((self.cfg.start_block, String::new())),
        }
    }

    /// Compares the stored block hash against the chain's current view of
    /// that height; on mismatch, rewinds by `max_reorg_depth` (§4.2 reorg policy).
    async fn detect_reorg(&self, cursor_height: u64) -> anyhow::Result<Option<(u64, String)>> {
        if cursor_height == 0 {
            return Ok(None);
        }
        let Some(stored) = self.store.load_cursor(&self.cfg.name).await? else {
            return Ok(None);
        };
        if stored.last_block_hash.is_empty() {
            return Ok(None);
        }
        let current = self.chain.block(cursor_height).await?;
        if current.hash == stored.last_block_hash {
            return Ok(None);
        }
        tracing::warn!(chain = %self.cfg.name, height = cursor_height, "reorg detected at cursor, rewinding");
        let rewound_height = cursor_height.saturating_sub(self.cfg.max_reorg_depth);
        let rewound_block = self.chain.block(rewound_height).await?;
        self.store
            .save_cursor(&self.cfg.name, &Cursor { last_block: rewound_height, last_block_hash: rewound_block.hash.clone() })
            .await?;
        Ok(Some((rewound_height, rewound_block.hash)))
    }

    async fn process_chunk(&self, from: u64, to: u64, tx: &mpsc::Sender<CrossChainMessage>) -> anyhow::Result<()> {
        let logs = self.chain.filter_logs(from, to).await?;
        for log in logs {
            let decoded = match decode_bridge_event_for(&self.cfg.family, &log) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(chain = %self.cfg.name, tx_hash = %log.tx_hash, error = %e, "skipping undecodable log");
                    continue;
                }
            };
            let id = CrossChainMessage::derive_id(&self.cfg.name, &log.tx_hash, log.log_index);
            let block = self.chain.block(log.block_number).await?;
            let msg = CrossChainMessage {
                id,
                kind: decoded.kind,
                source_chain: self.cfg.name.clone(),
                destination_chain: decoded.destination_chain,
                source_tx_hash: log.tx_hash.clone(),
                source_block: log.block_number,
                source_log_index: log.log_index,
                sender: decoded.sender,
                recipient: decoded.recipient,
                token_contract: decoded.token_contract,
                amount: decoded.amount,
                nonce: decoded.nonce,
                timestamp: block.timestamp,
                status: Status::Detected,
                attempts: 0,
                last_error: None,
                batch_id: None,
            };

            crate::metrics::LISTENER_MESSAGES_DETECTED
                .with_label_values(&[&self.cfg.name, kind_label(msg.kind)])
                .inc();

            if matches!(msg.kind, MessageKind::TokenLock | MessageKind::NftLock) {
                let lock = LockRecord {
                    id: msg.id.clone(),
                    chain: self.cfg.name.clone(),
                    contract: log.address.clone(),
                    sender: msg.sender.clone(),
                    token: msg.token_contract.clone(),
                    amount: msg.amount,
                    block: msg.source_block,
                    timestamp: msg.timestamp,
                };
                if let Err(e) = self.store.save_lock_record(&lock).await {
                    tracing::error!(chain = %self.cfg.name, id = %msg.id, error = %e, "failed to persist lock record");
                }
            }

            if tx.try_send(msg.clone()).is_err() {
                // Backpressure: drop the enqueue, not the event. The store
                // save below still happens inline so reconciliation can
                // re-publish later (§4.2 backpressure).
                tracing::warn!(chain = %self.cfg.name, id = %msg.id, "outbound channel full, deferring to reconciliation");
                persist_and_publish(&self.store, &self.queue, msg).await;
            }
        }
        Ok(())
    }
}

/// Persist, then publish; duplicate-key persists are a silent no-op (§8
/// "Duplicate"). The message is only marked `Queued` once `publish` actually
/// succeeds — a message that never made it onto the queue stays `Detected`
/// so reconciliation retries it, rather than recording a status the queue
/// never backed.
async fn persist_and_publish(store: &Arc<dyn Store>, queue: &Arc<dyn DurableQueue>, msg: CrossChainMessage) {
    let inserted = match store.save_message(&msg).await {
        Ok(inserted) => inserted,
        Err(e) => {
            tracing::error!(id = %msg.id, error = %e, "failed to persist message");
            return;
        }
    };
    if !inserted {
        return;
    }

    let mut attempt = 0;
    let mut backoff = PUBLISH_BACKOFF_BASE;
    loop {
        match queue.publish(&msg).await {
            Ok(()) => {
                if let Err(e) = store.update_status(&msg.id, Status::Queued, None, None, None).await {
                    tracing::error!(id = %msg.id, error = %e, "failed to mark message queued after publish");
                }
                return;
            }
            Err(QueueError::QueueUnavailable(e)) => {
                attempt += 1;
                if attempt >= PUBLISH_MAX_RETRIES {
                    tracing::warn!(id = %msg.id, error = %e, "publish exhausted retries, leaving for reconciliation");
                    return;
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(PUBLISH_BACKOFF_CAP);
            }
            Err(e) => {
                tracing::warn!(id = %msg.id, error = %e, "publish failed, leaving for reconciliation");
                return;
            }
        }
    }
}

fn kind_label(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::TokenLock => "token_lock",
        MessageKind::TokenUnlock => "token_unlock",
        MessageKind::NftLock => "nft_lock",
        MessageKind::NftUnlock => "nft_unlock",
    }
}

pub(crate) fn reorg_grace_period() -> Duration {
    REORG_GRACE_PERIOD
}
