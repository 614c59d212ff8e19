mod postgres;

pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::StoreError;
use crate::message::{CrossChainMessage, Status};

#[derive(Debug, Clone)]
pub struct LockRecord {
    pub id: String,
    pub chain: String,
    pub contract: String,
    pub sender: String,
    pub token: String,
    pub amount: Decimal,
    pub block: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Cursor {
    pub last_block: u64,
    pub last_block_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Accumulating,
    Ready,
    Dispatched,
    Acknowledged,
    Failed,
}

#[derive(Debug, Clone)]
pub struct BatchRecord {
    pub batch_id: String,
    pub source: String,
    pub destination: String,
    pub state: BatchState,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub message_count: u32,
    pub total_value: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub pending_batch_count: u64,
    pub pending_message_count: u64,
    pub total_value_locked: Decimal,
}

/// The persistent store contract (C4): the durable, authoritative sink every
/// other component treats as the system of record.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert-or-fail-on-duplicate keyed by `id`. Returns `Ok(false)` when the
    /// row already existed (idempotent replay), `Ok(true)` when newly inserted.
    async fn save_message(&self, msg: &CrossChainMessage) -> Result<bool, StoreError>;

    /// Moves `id` to `new_status`. Enforces `is_legal_transition` against the
    /// row's current status, returning `StoreError::IllegalTransition` rather
    /// than writing an edge the status graph doesn't allow.
    async fn update_status(
        &self,
        id: &str,
        new_status: Status,
        batch_id: Option<&str>,
        last_error: Option<&str>,
        attempts: Option<u32>,
    ) -> Result<(), StoreError>;

    async fn get_message(&self, id: &str) -> Result<Option<CrossChainMessage>, StoreError>;

    async fn list_by_address(&self, address: &str) -> Result<Vec<CrossChainMessage>, StoreError>;

    /// Messages in status `Queued` for `(source, destination)`, oldest first.
    async fn list_pending(&self, source: &str, destination: &str, limit: u64) -> Result<Vec<CrossChainMessage>, StoreError>;

    /// Messages stuck in `Detected`, used by the reconciliation pass.
    async fn list_detected(&self, limit: u64) -> Result<Vec<CrossChainMessage>, StoreError>;

    /// Optimistic `Queued -> Batched` claim: only ids still `Queued` are
    /// actually claimed; returns the subset that won the race.
    async fn claim_for_batch(&self, ids: &[String], batch_id: &str) -> Result<Vec<String>, StoreError>;

    async fn save_lock_record(&self, record: &LockRecord) -> Result<(), StoreError>;

    async fn list_unmatched_locks(&self, chain: &str) -> Result<Vec<LockRecord>, StoreError>;

    async fn load_cursor(&self, chain: &str) -> Result<Option<Cursor>, StoreError>;

    async fn save_cursor(&self, chain: &str, cursor: &Cursor) -> Result<(), StoreError>;

    async fn insert_batch(&self, batch: &BatchRecord) -> Result<(), StoreError>;

    async fn update_batch_state(&self, batch_id: &str, state: BatchState, dispatched_at: Option<DateTime<Utc>>) -> Result<(), StoreError>;

    async fn get_batch_stats(&self) -> Result<StoreStats, StoreError>;
}
