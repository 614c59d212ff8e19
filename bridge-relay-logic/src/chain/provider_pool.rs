use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use governor::{Quota, RateLimiter};
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::ChainError;

/// Per-endpoint behavioral tuning. Named endpoints so log lines and metrics
/// can identify which node tripped a failover, the way a multi-node facade
/// needs to for on-call triage.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub name: String,
    pub url: String,
    pub max_rps: u32,
    pub error_threshold: u32,
    pub cooldown: Duration,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub health_period: Duration,
    pub probe_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            health_period: Duration::from_secs(15),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

/// A single JSON-RPC call, transport-agnostic so the pool can front EVM,
/// Solana, and NEAR endpoints alike.
pub struct RpcRequest<'a> {
    pub method: &'a str,
    pub params: Value,
}

#[async_trait::async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, url: &str, req: RpcRequest<'_>, timeout: Duration) -> anyhow::Result<Value>;
}

/// Default transport: plain JSON-RPC 2.0 over HTTP via `reqwest`.
pub struct HttpJsonRpcTransport {
    client: reqwest::Client,
}

impl Default for HttpJsonRpcTransport {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl RpcTransport for HttpJsonRpcTransport {
    async fn call(&self, url: &str, req: RpcRequest<'_>, timeout: Duration) -> anyhow::Result<Value> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": req.method,
            "params": req.params,
        });
        let resp = tokio::time::timeout(timeout, self.client.post(url).json(&body).send())
            .await
            .map_err(|_| anyhow::anyhow!("rpc call to {url} timed out"))??;
        let value: Value = resp.json().await?;
        if let Some(err) = value.get("error") {
            anyhow::bail!("rpc error from {url}: {err}");
        }
        Ok(value.get("result").cloned().unwrap_or(Value::Null))
    }
}

struct NodeState {
    disabled_until: Option<Instant>,
    consecutive_errors: u32,
}

struct Node {
    cfg: NodeConfig,
    limiter: RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>,
    state: RwLock<NodeState>,
}

/// A failover-and-health-tracked pool over a chain's declared-order RPC
/// endpoint list. Endpoints are tried in declared order on each call;
/// transient errors advance to the next endpoint without surfacing failure
/// until all are exhausted.
pub struct ProviderPool {
    chain: String,
    nodes: Vec<Node>,
    transport: Arc<dyn RpcTransport>,
    cfg: PoolConfig,
    cached_latest_block: AtomicU64,
    last_advanced_at: RwLock<Instant>,
}

impl ProviderPool {
    pub fn new(chain: impl Into<String>, endpoints: &[String], cfg: PoolConfig, transport: Arc<dyn RpcTransport>) -> Self {
        let nodes = endpoints
            .iter()
            .enumerate()
            .map(|(i, url)| {
                let node_cfg = NodeConfig {
                    name: format!("node-{i}"),
                    url: url.clone(),
                    max_rps: 20,
                    error_threshold: 3,
                    cooldown: Duration::from_secs(30),
                };
                Node {
                    limiter: RateLimiter::direct(Quota::per_second(NonZeroU32::new(node_cfg.max_rps).unwrap())),
                    cfg: node_cfg,
                    state: RwLock::new(NodeState {
                        disabled_until: None,
                        consecutive_errors: 0,
                    }),
                }
            })
            .collect();
        Self {
            chain: chain.into(),
            nodes,
            transport,
            cfg,
            cached_latest_block: AtomicU64::new(0),
            last_advanced_at: RwLock::new(Instant::now()),
        }
    }

    fn is_available(&self, node: &Node) -> bool {
        let state = node.state.read();
        match state.disabled_until {
            Some(until) => Instant::now() >= until,
            None => true,
        }
    }

    fn mark_error(&self, node: &Node) {
        crate::metrics::CHAIN_NODE_ERRORS_TOTAL
            .with_label_values(&[&self.chain, &node.cfg.name])
            .inc();
        let mut state = node.state.write();
        state.consecutive_errors += 1;
        if state.consecutive_errors >= node.cfg.error_threshold {
            state.disabled_until = Some(Instant::now() + node.cfg.cooldown);
            crate::metrics::CHAIN_NODE_HEALTHY
                .with_label_values(&[&self.chain, &node.cfg.name])
                .set(0.0);
            tracing::warn!(chain = %self.chain, node = %node.cfg.name, "rpc node entering cooldown after repeated errors");
        }
    }

    fn mark_ok(&self, node: &Node) {
        let mut state = node.state.write();
        state.consecutive_errors = 0;
        state.disabled_until = None;
        crate::metrics::CHAIN_NODE_HEALTHY
            .with_label_values(&[&self.chain, &node.cfg.name])
            .set(1.0);
    }

    /// Tries every available endpoint in declared order; returns
    /// `ChainUnavailable` only once all have failed for this call.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let mut last_err = None;
        for node in &self.nodes {
            if !self.is_available(node) {
                continue;
            }
            if node.limiter.check().is_err() {
                continue;
            }
            let req = RpcRequest { method, params: params.clone() };
            match self.transport.call(&node.cfg.url, req, self.cfg.probe_timeout).await {
                Ok(value) => {
                    self.mark_ok(node);
                    return Ok(value);
                }
                Err(err) => {
                    tracing::debug!(chain = %self.chain, node = %node.cfg.name, error = %err, "rpc call failed, trying next endpoint");
                    self.mark_error(node);
                    last_err = Some(err);
                }
            }
        }
        match last_err {
            Some(err) => Err(ChainError::TransientRpc {
                chain: self.chain.clone(),
                source: err,
            }),
            None => Err(ChainError::ChainUnavailable {
                chain: self.chain.clone(),
            }),
        }
    }

    pub fn note_latest_block(&self, height: u64) {
        let prev = self.cached_latest_block.swap(height, Ordering::SeqCst);
        if height > prev {
            *self.last_advanced_at.write() = Instant::now();
        }
    }

    pub fn is_healthy(&self, block_time: Duration) -> bool {
        let any_available = self.nodes.iter().any(|n| self.is_available(n));
        let stalled = self.last_advanced_at.read().elapsed() > block_time * 3;
        any_available && !stalled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FlakyTransport {
        calls: AtomicUsize,
        fail_first_n: usize,
    }

    #[async_trait::async_trait]
    impl RpcTransport for FlakyTransport {
        async fn call(&self, _url: &str, _req: RpcRequest<'_>, _timeout: Duration) -> anyhow::Result<Value> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                anyhow::bail!("simulated transient failure");
            }
            Ok(Value::from(42))
        }
    }

    #[tokio::test]
    async fn fails_over_to_next_endpoint_on_transient_error() {
        let transport = Arc::new(FlakyTransport {
            calls: AtomicUsize::new(0),
            fail_first_n: 1,
        });
        let pool = ProviderPool::new(
            "ethereum",
            &["http://node-a".to_string(), "http://node-b".to_string()],
            PoolConfig::default(),
            transport,
        );
        let result = pool.request("eth_blockNumber", Value::Null).await.unwrap();
        assert_eq!(result, Value::from(42));
    }

    #[tokio::test]
    async fn returns_chain_unavailable_when_all_endpoints_fail() {
        struct AlwaysFails;
        #[async_trait::async_trait]
        impl RpcTransport for AlwaysFails {
            async fn call(&self, _url: &str, _req: RpcRequest<'_>, _timeout: Duration) -> anyhow::Result<Value> {
                anyhow::bail!("down")
            }
        }
        let pool = ProviderPool::new(
            "ethereum",
            &["http://node-a".to_string()],
            PoolConfig::default(),
            Arc::new(AlwaysFails),
        );
        // Drain the error threshold so the node is disabled, then confirm the
        // *next* call degrades to ChainUnavailable rather than TransientRpc.
        for _ in 0..3 {
            let _ = pool.request("eth_blockNumber", Value::Null).await;
        }
        let err = pool.request("eth_blockNumber", Value::Null).await.unwrap_err();
        assert!(matches!(err, ChainError::ChainUnavailable { .. }));
    }
}
