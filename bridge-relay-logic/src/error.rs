use thiserror::Error;

/// Errors surfaced by the chain client facade (C1).
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("transient RPC error on {chain}: {source}")]
    TransientRpc {
        chain: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("all RPC endpoints for chain {chain} are unavailable")]
    ChainUnavailable { chain: String },
    #[error("malformed response from {chain}: {reason}")]
    DecodeError { chain: String, reason: String },
}

/// Errors surfaced by the durable queue facade (C3).
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    QueueUnavailable(#[source] anyhow::Error),
    #[error("queue backlog above threshold ({depth} > {threshold})")]
    Backlog { depth: u64, threshold: u64 },
}

/// Errors surfaced by the persistent store facade (C4).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate message id {0}")]
    Duplicate(String),
    #[error("illegal status transition for message {id}: {from} -> {to}")]
    IllegalTransition { id: String, from: String, to: String },
    #[error(transparent)]
    Db(#[from] sea_orm::DbErr),
}

/// Errors surfaced by the batch aggregator (C5).
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("relayer submission failed: {0}")]
    RelayerFailed(#[source] anyhow::Error),
}
