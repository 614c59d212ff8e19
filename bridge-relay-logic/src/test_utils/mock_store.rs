use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::message::{is_legal_transition, CrossChainMessage, Status};
use crate::store::{BatchRecord, BatchState, Cursor, LockRecord, Store, StoreStats};

#[derive(Default)]
struct Inner {
    messages: HashMap<String, CrossChainMessage>,
    locks: HashMap<String, LockRecord>,
    cursors: HashMap<String, Cursor>,
    batches: HashMap<String, BatchRecord>,
}

/// A single-process, mutex-guarded `Store` used by listener and aggregator
/// unit tests. `claim_for_batch` reproduces the optimistic-concurrency
/// contract (only ids still `Queued` are claimed) without a database.
#[derive(Default)]
pub struct MockStore {
    inner: Mutex<Inner>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MockStore {
    async fn save_message(&self, msg: &CrossChainMessage) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        if inner.messages.contains_key(&msg.id) {
            return Ok(false);
        }
        inner.messages.insert(msg.id.clone(), msg.clone());
        Ok(true)
    }

    async fn update_status(
        &self,
        id: &str,
        new_status: Status,
        batch_id: Option<&str>,
        last_error: Option<&str>,
        attempts: Option<u32>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let msg = inner.messages.get_mut(id).ok_or_else(|| StoreError::Duplicate(id.to_string()))?;
        if msg.status != new_status && !is_legal_transition(msg.status, new_status) {
            return Err(StoreError::IllegalTransition {
                id: id.to_string(),
                from: msg.status.to_string(),
                to: new_status.to_string(),
            });
        }
        msg.status = new_status;
        if let Some(b) = batch_id {
            msg.batch_id = Some(b.to_string());
        }
        if let Some(e) = last_error {
            msg.last_error = Some(e.to_string());
        }
        if let Some(a) = attempts {
            msg.attempts = a;
        }
        Ok(())
    }

    async fn get_message(&self, id: &str) -> Result<Option<CrossChainMessage>, StoreError> {
        Ok(self.inner.lock().messages.get(id).cloned())
    }

    async fn list_by_address(&self, address: &str) -> Result<Vec<CrossChainMessage>, StoreError> {
        Ok(self
            .inner
            .lock()
            .messages
            .values()
            .filter(|m| m.sender == address || m.recipient == address)
            .cloned()
            .collect())
    }

    async fn list_pending(&self, source: &str, destination: &str, limit: u64) -> Result<Vec<CrossChainMessage>, StoreError> {
        let inner = self.inner.lock();
        let mut matches: Vec<_> = inner
            .messages
            .values()
            .filter(|m| m.source_chain == source && m.destination_chain == destination && m.status == Status::Queued)
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(limit as usize);
        Ok(matches)
    }

    async fn list_detected(&self, limit: u64) -> Result<Vec<CrossChainMessage>, StoreError> {
        let inner = self.inner.lock();
        let mut matches: Vec<_> = inner.messages.values().filter(|m| m.status == Status::Detected).cloned().collect();
        matches.sort_by_key(|m| m.timestamp);
        matches.truncate(limit as usize);
        Ok(matches)
    }

    async fn claim_for_batch(&self, ids: &[String], batch_id: &str) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.lock();
        let mut winners = Vec::new();
        for id in ids {
            if let Some(msg) = inner.messages.get_mut(id) {
                if msg.status == Status::Queued {
                    msg.status = Status::Batched;
                    msg.batch_id = Some(batch_id.to_string());
                    winners.push(id.clone());
                }
            }
        }
        Ok(winners)
    }

    async fn save_lock_record(&self, record: &LockRecord) -> Result<(), StoreError> {
        self.inner.lock().locks.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn list_unmatched_locks(&self, chain: &str) -> Result<Vec<LockRecord>, StoreError> {
        Ok(self.inner.lock().locks.values().filter(|l| l.chain == chain).cloned().collect())
    }

    async fn load_cursor(&self, chain: &str) -> Result<Option<Cursor>, StoreError> {
        Ok(self.inner.lock().cursors.get(chain).cloned())
    }

    async fn save_cursor(&self, chain: &str, cursor: &Cursor) -> Result<(), StoreError> {
        self.inner.lock().cursors.insert(chain.to_string(), cursor.clone());
        Ok(())
    }

    async fn insert_batch(&self, batch: &BatchRecord) -> Result<(), StoreError> {
        self.inner.lock().batches.insert(batch.batch_id.clone(), batch.clone());
        Ok(())
    }

    async fn update_batch_state(&self, batch_id: &str, state: BatchState, dispatched_at: Option<DateTime<Utc>>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let batch = inner.batches.get_mut(batch_id).ok_or_else(|| StoreError::Duplicate(batch_id.to_string()))?;
        batch.state = state;
        if let Some(at) = dispatched_at {
            batch.dispatched_at = Some(at);
        }
        Ok(())
    }

    async fn get_batch_stats(&self) -> Result<StoreStats, StoreError> {
        let inner = self.inner.lock();
        let pending_batch_count = inner
            .batches
            .values()
            .filter(|b| matches!(b.state, BatchState::Accumulating | BatchState::Ready))
            .count() as u64;
        let pending = inner.messages.values().filter(|m| m.status == Status::Queued);
        let pending_message_count = pending.clone().count() as u64;
        let total_value_locked = pending.fold(rust_decimal::Decimal::ZERO, |acc, m| acc + m.amount);
        Ok(StoreStats {
            pending_batch_count,
            pending_message_count,
            total_value_locked,
        })
    }
}
