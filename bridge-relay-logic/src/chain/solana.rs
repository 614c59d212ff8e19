use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::chain::provider_pool::{HttpJsonRpcTransport, PoolConfig, ProviderPool};
use crate::chain::{BlockInfo, ChainClient, ChainLog, TxStatus};
use crate::config::ChainConfig;
use crate::error::ChainError;

/// Solana's unit of chain progress is the slot; the facade exposes it through
/// the same `latest_block`/`filter_logs` surface as the EVM family so the
/// listener never branches on chain family.
pub struct SolanaChainClient {
    cfg: ChainConfig,
    pool: ProviderPool,
}

impl SolanaChainClient {
    pub fn new(cfg: ChainConfig) -> Self {
        let pool = ProviderPool::new(
            cfg.name.clone(),
            &cfg.rpc_endpoints,
            PoolConfig::default(),
            Arc::new(HttpJsonRpcTransport::default()),
        );
        Self { cfg, pool }
    }
}

#[async_trait]
impl ChainClient for SolanaChainClient {
    fn name(&self) -> &str {
        &self.cfg.name
    }

    async fn latest_block(&self) -> Result<u64, ChainError> {
        let result = self.pool.request("getSlot", json!([{"commitment": "confirmed"}])).await?;
        let slot = result.as_u64().ok_or_else(|| decode_err(&self.cfg.name, "getSlot result not a number"))?;
        self.pool.note_latest_block(slot);
        Ok(slot)
    }

    async fn block(&self, height: u64) -> Result<BlockInfo, ChainError> {
        let result = self
            .pool
            .request("getBlock", json!([height, {"transactionDetails": "none", "maxSupportedTransactionVersion": 0}]))
            .await?;
        let block_time = result.get("blockTime").and_then(Value::as_i64).unwrap_or(0);
        let hash = result
            .get("blockhash")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(BlockInfo {
            height,
            hash,
            timestamp: chrono::DateTime::from_timestamp(block_time, 0).unwrap_or_default(),
            tx_count: 0,
        })
    }

    /// Equivalent of EVM's log filter: signature-scan for the bridge program
    /// address over the slot range, one `getSignaturesForAddress` window at a
    /// time. Program-log parsing into bridge-event fields is the listener's
    /// responsibility, mirroring the EVM path.
    async fn filter_logs(&self, from: u64, to: u64) -> Result<Vec<ChainLog>, ChainError> {
        let result = self
            .pool
            .request(
                "getSignaturesForAddress",
                json!([self.cfg.bridge_contract, {"limit": 1000}]),
            )
            .await?;
        let entries = result.as_array().ok_or_else(|| decode_err(&self.cfg.name, "result not an array"))?;
        let mut logs = Vec::new();
        for (idx, entry) in entries.iter().enumerate() {
            let slot = entry.get("slot").and_then(Value::as_u64).unwrap_or(0);
            if slot < from || slot > to {
                continue;
            }
            let signature = entry.get("signature").and_then(Value::as_str).unwrap_or_default().to_string();
            logs.push(ChainLog {
                block_number: slot,
                log_index: idx as u32,
                tx_hash: signature,
                address: self.cfg.bridge_contract.clone(),
                topics: Vec::new(),
                data: Vec::new(),
            });
        }
        logs.sort_by_key(|l| (l.block_number, l.log_index));
        Ok(logs)
    }

    async fn tx_status(&self, tx_hash: &str) -> Result<TxStatus, ChainError> {
        let result = self
            .pool
            .request("getSignatureStatuses", json!([[tx_hash]]))
            .await?;
        let status = result
            .get("value")
            .and_then(Value::as_array)
            .and_then(|v| v.first())
            .cloned()
            .unwrap_or(Value::Null);
        if status.is_null() {
            return Ok(TxStatus {
                confirmed: false,
                finalized: false,
                success: false,
                gas_used: None,
                error: None,
            });
        }
        let err = status.get("err").filter(|v| !v.is_null());
        Ok(TxStatus {
            confirmed: true,
            finalized: status
                .get("confirmationStatus")
                .and_then(Value::as_str)
                .map(|s| s == "finalized")
                .unwrap_or(false),
            success: err.is_none(),
            gas_used: None,
            error: err.map(|e| e.to_string()),
        })
    }

    async fn send_tx(&self, payload: &[u8]) -> Result<String, ChainError> {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(payload);
        let result = self
            .pool
            .request("sendTransaction", json!([encoded, {"encoding": "base64"}]))
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| decode_err(&self.cfg.name, "send_tx result not a string"))
    }

    async fn native_balance(&self, address: &str) -> Result<Decimal, ChainError> {
        let result = self.pool.request("getBalance", json!([address])).await?;
        let lamports = result
            .get("value")
            .and_then(Value::as_u64)
            .ok_or_else(|| decode_err(&self.cfg.name, "getBalance missing value"))?;
        Ok(Decimal::from(lamports))
    }

    async fn token_balance(&self, address: &str, token: &str) -> Result<Decimal, ChainError> {
        let result = self
            .pool
            .request("getTokenAccountBalance", json!([address, {"mint": token}]))
            .await?;
        let amount = result
            .get("value")
            .and_then(|v| v.get("amount"))
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<u128>().ok())
            .unwrap_or(0);
        Ok(Decimal::from(amount))
    }

    fn block_time(&self) -> Duration {
        self.cfg.block_time
    }

    fn confirmation_depth(&self) -> u64 {
        self.cfg.confirmation_depth
    }

    async fn is_healthy(&self) -> bool {
        self.pool.is_healthy(self.cfg.block_time)
    }

    async fn close(&self) {}
}

fn decode_err(chain: &str, reason: &str) -> ChainError {
    ChainError::DecodeError {
        chain: chain.to_string(),
        reason: reason.to_string(),
    }
}
