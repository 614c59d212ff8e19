pub mod mock_chain;
pub mod mock_queue;
pub mod mock_store;

pub use mock_chain::MockChainClient;
pub use mock_queue::MockQueue;
pub use mock_store::MockStore;
