use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::chain::{BlockInfo, ChainClient, ChainLog, TxStatus};
use crate::error::ChainError;

/// An in-memory `ChainClient` driven entirely by pre-seeded blocks and logs,
/// for testing listener logic without a live RPC endpoint.
pub struct MockChainClient {
    name: String,
    blocks: RwLock<Vec<BlockInfo>>,
    logs: RwLock<Vec<ChainLog>>,
    latest: AtomicU64,
    healthy: RwLock<bool>,
}

impl MockChainClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: RwLock::new(Vec::new()),
            logs: RwLock::new(Vec::new()),
            latest: AtomicU64::new(0),
            healthy: RwLock::new(true),
        }
    }

    pub fn push_block(&self, height: u64, hash: impl Into<String>) {
        self.blocks.write().push(BlockInfo {
            height,
            hash: hash.into(),
            timestamp: Utc::now(),
            tx_count: 0,
        });
        self.latest.store(height, Ordering::SeqCst);
    }

    pub fn push_log(&self, log: ChainLog) {
        self.logs.write().push(log);
    }

    pub fn set_healthy(&self, healthy: bool) {
        *self.healthy.write() = healthy;
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn latest_block(&self) -> Result<u64, ChainError> {
        Ok(self.latest.load(Ordering::SeqCst))
    }

    async fn block(&self, height: u64) -> Result<BlockInfo, ChainError> {
        self.blocks
            .read()
            .iter()
            .find(|b| b.height == height)
            .cloned()
            .ok_or_else(|| ChainError::DecodeError {
                chain: self.name.clone(),
                reason: format!("no seeded block at height {height}"),
            })
    }

    async fn filter_logs(&self, from: u64, to: u64) -> Result<Vec<ChainLog>, ChainError> {
        Ok(self
            .logs
            .read()
            .iter()
            .filter(|l| l.block_number >= from && l.block_number <= to)
            .cloned()
            .collect())
    }

    async fn tx_status(&self, _tx_hash: &str) -> Result<TxStatus, ChainError> {
        Ok(TxStatus {
            confirmed: true,
            finalized: true,
            success: true,
            gas_used: Some(21_000),
            error: None,
        })
    }

    async fn send_tx(&self, _payload: &[u8]) -> Result<String, ChainError> {
        Ok("0xmocktxhash".to_string())
    }

    async fn native_balance(&self, _address: &str) -> Result<Decimal, ChainError> {
        Ok(Decimal::ZERO)
    }

    async fn token_balance(&self, _address: &str, _token: &str) -> Result<Decimal, ChainError> {
        Ok(Decimal::ZERO)
    }

    fn block_time(&self) -> Duration {
        Duration::from_secs(1)
    }

    fn confirmation_depth(&self) -> u64 {
        0
    }

    async fn is_healthy(&self) -> bool {
        *self.healthy.read()
    }

    async fn close(&self) {}
}
