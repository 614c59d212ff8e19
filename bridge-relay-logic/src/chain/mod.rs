mod evm;
mod near;
mod provider_pool;
mod solana;

pub use evm::EvmChainClient;
pub use near::NearChainClient;
pub use provider_pool::{NodeConfig, PoolConfig, ProviderPool, RpcRequest, RpcTransport};
pub use solana::SolanaChainClient;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::{ChainConfig, ChainFamily};
use crate::error::ChainError;
use crate::message::MessageKind;

#[derive(Debug, Clone)]
pub struct BlockInfo {
    pub height: u64,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
    pub tx_count: u64,
}

/// A single decoded bridge-contract log entry, already oriented to the
/// canonical coordinate system `(block, log_index)` regardless of chain family.
#[derive(Debug, Clone)]
pub struct ChainLog {
    pub block_number: u64,
    pub log_index: u32,
    pub tx_hash: String,
    pub address: String,
    pub topics: Vec<String>,
    pub data: Vec<u8>,
}

/// A bridge event decoded from a `ChainLog`, still missing the coordinates
/// (`source_chain`, block, tx hash) only the listener knows.
#[derive(Debug, Clone)]
pub struct DecodedEvent {
    pub kind: MessageKind,
    pub sender: String,
    pub recipient: String,
    pub destination_chain: String,
    pub token_contract: String,
    pub amount: rust_decimal::Decimal,
    pub nonce: u64,
}

#[derive(Debug, Clone)]
pub struct TxStatus {
    pub confirmed: bool,
    pub finalized: bool,
    pub success: bool,
    pub gas_used: Option<u64>,
    pub error: Option<String>,
}

/// The uniform capability surface every chain family variant implements.
///
/// Endpoint failover and health bookkeeping live entirely behind this trait;
/// callers never see individual RPC endpoints.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn name(&self) -> &str;

    async fn latest_block(&self) -> Result<u64, ChainError>;

    async fn block(&self, height: u64) -> Result<BlockInfo, ChainError>;

    /// Inclusive range `[from, to]`, already restricted to the bridge contract
    /// address by the implementation.
    async fn filter_logs(&self, from: u64, to: u64) -> Result<Vec<ChainLog>, ChainError>;

    async fn tx_status(&self, tx_hash: &str) -> Result<TxStatus, ChainError>;

    async fn send_tx(&self, payload: &[u8]) -> Result<String, ChainError>;

    async fn native_balance(&self, address: &str) -> Result<rust_decimal::Decimal, ChainError>;

    async fn token_balance(&self, address: &str, token: &str) -> Result<rust_decimal::Decimal, ChainError>;

    fn block_time(&self) -> std::time::Duration;

    fn confirmation_depth(&self) -> u64;

    /// False if the last N probes failed, or block height has not advanced
    /// for more than `3 * block_time`.
    async fn is_healthy(&self) -> bool;

    async fn close(&self);
}

/// Builds the correct `ChainClient` variant for a chain's configured family.
pub fn build_chain_client(cfg: &ChainConfig) -> Arc<dyn ChainClient> {
    match cfg.family {
        ChainFamily::Evm => Arc::new(EvmChainClient::new(cfg.clone())),
        ChainFamily::Solana => Arc::new(SolanaChainClient::new(cfg.clone())),
        ChainFamily::Near => Arc::new(NearChainClient::new(cfg.clone())),
    }
}

/// Dispatches log decoding by chain family. ABI-accurate decoding is only
/// implemented for EVM; Solana and NEAR bridge programs do not expose a
/// stable log ABI in scope here (see design notes on the `createMessageFromLog`
/// open question).
pub fn decode_bridge_event_for(family: &ChainFamily, log: &ChainLog) -> Result<DecodedEvent, ChainError> {
    match family {
        ChainFamily::Evm => evm::decode_bridge_event(log),
        ChainFamily::Solana => Err(ChainError::DecodeError {
            chain: "solana".to_string(),
            reason: "ABI-accurate Solana program log decoding is out of scope".to_string(),
        }),
        ChainFamily::Near => Err(ChainError::DecodeError {
            chain: "near".to_string(),
            reason: "ABI-accurate NEAR receipt log decoding is out of scope".to_string(),
        }),
    }
}
