pub mod aggregator;
pub mod chain;
pub mod config;
pub mod error;
pub mod listener;
pub mod message;
pub mod metrics;
pub mod queue;
pub mod relayer;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
