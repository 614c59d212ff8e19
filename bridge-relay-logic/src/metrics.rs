use lazy_static::lazy_static;
use prometheus::{register_gauge, register_gauge_vec, register_int_counter_vec, Gauge, GaugeVec, IntCounterVec};

// Keep labels low-cardinality: chain name, (source, destination) pair.
lazy_static! {
    pub static ref LISTENER_BLOCKS_BEHIND: GaugeVec = register_gauge_vec!(
        "bridge_relay_listener_blocks_behind",
        "gap between the listener's persisted cursor and the chain's safe head",
        &["chain"]
    )
    .unwrap();

    pub static ref LISTENER_MESSAGES_DETECTED: IntCounterVec = register_int_counter_vec!(
        "bridge_relay_listener_messages_detected_total",
        "bridge events decoded into canonical messages",
        &["chain", "kind"]
    )
    .unwrap();

    pub static ref QUEUE_DEPTH: Gauge =
        register_gauge!("bridge_relay_queue_depth", "current JetStream stream depth").unwrap();

    pub static ref CHAIN_NODE_HEALTHY: GaugeVec = register_gauge_vec!(
        "bridge_relay_chain_node_healthy",
        "1 if the rpc endpoint is available, 0 while in cooldown",
        &["chain", "node"]
    )
    .unwrap();

    pub static ref CHAIN_NODE_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "bridge_relay_chain_node_errors_total",
        "rpc calls that failed against this endpoint",
        &["chain", "node"]
    )
    .unwrap();

    pub static ref STORE_PENDING_BATCH_COUNT: Gauge = register_gauge!(
        "bridge_relay_store_pending_batch_count",
        "batches not yet acknowledged or failed"
    )
    .unwrap();

    pub static ref STORE_PENDING_MESSAGE_COUNT: Gauge = register_gauge!(
        "bridge_relay_store_pending_message_count",
        "messages still queued, awaiting a batch"
    )
    .unwrap();

    pub static ref STORE_TOTAL_VALUE_LOCKED: Gauge = register_gauge!(
        "bridge_relay_store_total_value_locked",
        "sum of amount across queued messages"
    )
    .unwrap();

    pub static ref AGGREGATOR_BATCHES_DISPATCHED: IntCounterVec = register_int_counter_vec!(
        "bridge_relay_aggregator_batches_dispatched_total",
        "batches handed to the relayer",
        &["source", "destination"]
    )
    .unwrap();

    pub static ref AGGREGATOR_MESSAGES_CONFIRMED: IntCounterVec = register_int_counter_vec!(
        "bridge_relay_aggregator_messages_confirmed_total",
        "messages the relayer reported confirmed",
        &["source", "destination"]
    )
    .unwrap();

    pub static ref AGGREGATOR_MESSAGES_FAILED: IntCounterVec = register_int_counter_vec!(
        "bridge_relay_aggregator_messages_failed_total",
        "messages the relayer reported failed",
        &["source", "destination"]
    )
    .unwrap();
}

/// Mirrors a store stats snapshot into the store gauges. Called after each
/// aggregator tick and by the reconciliation pass.
pub fn observe_store_stats(stats: &crate::store::StoreStats) {
    STORE_PENDING_BATCH_COUNT.set(stats.pending_batch_count as f64);
    STORE_PENDING_MESSAGE_COUNT.set(stats.pending_message_count as f64);
    STORE_TOTAL_VALUE_LOCKED.set(stats.total_value_locked.to_string().parse().unwrap_or(0.0));
}
