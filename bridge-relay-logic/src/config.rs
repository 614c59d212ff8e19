use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};

/// Chain family a `ChainConfig` belongs to; determines which `ChainClient`
/// implementation the facade constructs for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Evm,
    Solana,
    Near,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainConfig {
    pub name: String,
    pub family: ChainFamily,
    pub chain_id: u64,
    /// Tried in declared order; failover moves to the next on transient error.
    pub rpc_endpoints: Vec<String>,
    pub bridge_contract: String,
    #[serde(default)]
    pub start_block: u64,
    #[serde(default = "default_confirmation_depth")]
    pub confirmation_depth: u64,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_poll_interval")]
    pub poll_interval: Duration,
    #[serde(default = "default_max_reorg_depth")]
    pub max_reorg_depth: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_block_time")]
    pub block_time: Duration,
}

fn default_confirmation_depth() -> u64 {
    12
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_max_reorg_depth() -> u64 {
    20
}

fn default_block_time() -> Duration {
    Duration::from_secs(12)
}

fn default_true() -> bool {
    true
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    pub urls: Vec<String>,
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_ack_wait")]
    pub ack_wait: Duration,
    #[serde(default = "default_backlog_threshold")]
    pub backlog_threshold: u64,
}

fn default_stream_name() -> String {
    "bridge-relay-messages".to_string()
}

fn default_subject() -> String {
    "bridge.relay.messages".to_string()
}

fn default_max_retries() -> u32 {
    5
}

fn default_ack_wait() -> Duration {
    Duration::from_secs(30)
}

fn default_backlog_threshold() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub dsn: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_pool_size() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayerConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: u32,
}

fn default_worker_count() -> u32 {
    4
}

/// Per chain-pair batching policy, with crate-wide defaults applied when a
/// pair has no override entry.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchPolicy {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_min_batch_size")]
    pub min_batch_size: usize,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_max_wait_time")]
    pub max_wait_time: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_min_submission_interval")]
    pub min_submission_interval: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            min_batch_size: default_min_batch_size(),
            max_wait_time: default_max_wait_time(),
            min_submission_interval: default_min_submission_interval(),
        }
    }
}

fn default_max_batch_size() -> usize {
    100
}

fn default_min_batch_size() -> usize {
    5
}

fn default_max_wait_time() -> Duration {
    Duration::from_secs(30)
}

fn default_min_submission_interval() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChainPair {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatcherOverride {
    pub pair: ChainPair,
    #[serde(flatten)]
    pub policy: BatchPolicy,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregatorConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_tick_interval")]
    pub tick_interval: Duration,
    #[serde(default)]
    pub overrides: Vec<BatcherOverride>,
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            overrides: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default = "default_environment")]
    pub environment: String,
    pub chains: Vec<ChainConfig>,
    pub queue: QueueConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub relayer: RelayerConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
}

fn default_environment() -> String {
    "production".to_string()
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a JSON file, layering `BRIDGE_RELAY__*`
    /// environment overrides on top the way the `config` crate's environment
    /// source composes with a file source.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("BRIDGE_RELAY").separator("__"))
            .build()?;
        let cfg: AppConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Fatal-at-startup configuration checks (§8 "Configuration" error kind).
    fn validate(&self) -> anyhow::Result<()> {
        for chain in &self.chains {
            if chain.rpc_endpoints.is_empty() {
                anyhow::bail!("chain {} has no rpc endpoints configured", chain.name);
            }
            if chain.bridge_contract.trim().is_empty() {
                anyhow::bail!("chain {} is missing a bridge contract address", chain.name);
            }
        }
        let known: std::collections::HashSet<&str> = self.chains.iter().map(|c| c.name.as_str()).collect();
        for over in &self.aggregator.overrides {
            if !known.contains(over.pair.source.as_str()) {
                anyhow::bail!("batcher override references unknown source chain {}", over.pair.source);
            }
            if !known.contains(over.pair.destination.as_str()) {
                anyhow::bail!(
                    "batcher override references unknown destination chain {}",
                    over.pair.destination
                );
            }
            if over.pair.source == over.pair.destination {
                anyhow::bail!("batcher override pair must have distinct source and destination");
            }
        }
        Ok(())
    }

    pub fn policy_for(&self, pair: &ChainPair) -> BatchPolicy {
        self.aggregator
            .overrides
            .iter()
            .find(|o| &o.pair == pair)
            .map(|o| o.policy.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_for_falls_back_to_default() {
        let cfg = AppConfig {
            environment: "development".into(),
            chains: vec![],
            queue: QueueConfig {
                urls: vec!["nats://localhost:4222".into()],
                stream_name: default_stream_name(),
                subject: default_subject(),
                max_retries: default_max_retries(),
                ack_wait: default_ack_wait(),
                backlog_threshold: default_backlog_threshold(),
            },
            database: DatabaseConfig {
                dsn: "postgres://localhost/test".into(),
                pool_size: default_pool_size(),
            },
            relayer: RelayerConfig::default(),
            aggregator: AggregatorConfig::default(),
        };
        let pair = ChainPair {
            source: "ethereum".into(),
            destination: "avalanche".into(),
        };
        assert_eq!(cfg.policy_for(&pair).max_batch_size, 100);
    }
}
