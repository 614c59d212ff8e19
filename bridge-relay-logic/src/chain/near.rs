use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::chain::provider_pool::{HttpJsonRpcTransport, PoolConfig, ProviderPool};
use crate::chain::{BlockInfo, ChainClient, ChainLog, TxStatus};
use crate::config::ChainConfig;
use crate::error::ChainError;

/// NEAR has no native log-filter RPC; the facade performs a block-scan,
/// pulling each block's chunks and matching receipts against the bridge
/// contract account id.
pub struct NearChainClient {
    cfg: ChainConfig,
    pool: ProviderPool,
}

impl NearChainClient {
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
impl ChainClient for NearChainClient {
    fn name(&self) -> &str {
        &self.cfg.name
    }

    async fn latest_block(&self) -> Result<u64, ChainError> {
        let result = self
            .pool
            .request("block", json!({"finality": "final"}))
            .await?;
        let height = result
            .get("header")
            .and_then(|h| h.get("height"))
            .and_then(Value::as_u64)
            .ok_or_else(|| decode_err(&self.cfg.name, "block result missing header.height"))?;
        self.pool.note_latest_block(height);
        Ok(height)
    }

    async fn block(&self, height: u64) -> Result<BlockInfo, ChainError> {
        let result = self.pool.request("block", json!({"block_id": height})).await?;
        let header = result
            .get("header")
            .ok_or_else(|| decode_err(&self.cfg.name, "block result missing header"))?;
        let hash = header.get("hash").and_then(Value::as_str).unwrap_or_default().to_string();
        let timestamp_nanos = header.get("timestamp").and_then(Value::as_u64).unwrap_or(0);
        let chunks = result.get("chunks").and_then(Value::as_array).map(|c| c.len() as u64).unwrap_or(0);
        Ok(BlockInfo {
            height,
            hash,
            timestamp: chrono::DateTime::from_timestamp((timestamp_nanos / 1_000_000_000) as i64, 0).unwrap_or_default(),
            tx_count: chunks,
        })
    }

    /// Block-scan: for each height in range, fetch the block and keep
    /// receipts whose `receiver_id` matches the bridge contract account.
    async fn filter_logs(&self, from: u64, to: u64) -> Result<Vec<ChainLog>, ChainError> {
        let mut logs = Vec::new();
        for height in from..=to {
            let result = match self.pool.request("block", json!({"block_id": height})).await {
                Ok(v) => v,
                Err(ChainError::DecodeError { .. }) => continue,
                Err(e) => return Err(e),
            };
            let Some(chunks) = result.get("chunks").and_then(Value::as_array) else {
                continue;
            };
            for (idx, chunk) in chunks.iter().enumerate() {
                let Some(receipt_account) = chunk.get("receiver_id").and_then(Value::as_str) else {
                    continue;
                };
                if receipt_account != self.cfg.bridge_contract {
                    continue;
                }
                logs.push(ChainLog {
                    block_number: height,
                    log_index: idx as u32,
                    tx_hash: chunk.get("chunk_hash").and_then(Value::as_str).unwrap_or_default().to_string(),
                    address: self.cfg.bridge_contract.clone(),
                    topics: Vec::new(),
                    data: Vec::new(),
                });
            }
        }
        Ok(logs)
    }

    async fn tx_status(&self, tx_hash: &str) -> Result<TxStatus, ChainError> {
        let result = self
            .pool
            .request("tx", json!([tx_hash, self.cfg.bridge_contract]))
            .await?;
        let success = result
            .get("status")
            .and_then(|s| s.get("SuccessValue"))
            .is_some();
        Ok(TxStatus {
            confirmed: true,
            finalized: true,
            success,
            gas_used: result.get("transaction_outcome").and_then(|o| o.get("outcome")).and_then(|o| o.get("gas_burnt")).and_then(Value::as_u64),
            error: if success { None } else { Some("receipt did not produce a SuccessValue".to_string()) },
        })
    }

    async fn send_tx(&self, payload: &[u8]) -> Result<String, ChainError> {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(payload);
        let result = self
            .pool
            .request("broadcast_tx_commit", json!([encoded]))
            .await?;
        result
            .get("transaction")
            .and_then(|t| t.get("hash"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| decode_err(&self.cfg.name, "send_tx result missing transaction hash"))
    }

    async fn native_balance(&self, address: &str) -> Result<Decimal, ChainError> {
        let result = self
            .pool
            .request(
                "query",
                json!({"request_type": "view_account", "finality": "final", "account_id": address}),
            )
            .await?;
        let amount = result
            .get("amount")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<u128>().ok())
            .unwrap_or(0);
        Ok(Decimal::from(amount))
    }

    async fn token_balance(&self, address: &str, token: &str) -> Result<Decimal, ChainError> {
        let args = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            json!({"account_id": address}).to_string(),
        );
        let result = self
            .pool
            .request(
                "query",
                json!({
                    "request_type": "call_function",
                    "finality": "final",
                    "account_id": token,
                    "method_name": "ft_balance_of",
                    "args_base64": args,
                }),
            )
            .await?;
        let bytes = result.get("result").and_then(Value::as_array).map(|arr| {
            arr.iter().filter_map(Value::as_u64).map(|b| b as u8).collect::<Vec<u8>>()
        }).unwrap_or_default();
        let text = String::from_utf8(bytes).unwrap_or_default();
        let amount: u128 = text.trim_matches('"').parse().unwrap_or(0);
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
