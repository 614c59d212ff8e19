use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::QueueError;
use crate::message::CrossChainMessage;
use crate::queue::{Delivery, DurableQueue};

/// An in-memory single-subject queue. No redelivery bookkeeping beyond a
/// flat counter; good enough to exercise publish/ack/nak call sites without
/// a broker.
#[derive(Default)]
pub struct MockQueue {
    inner: Mutex<VecDeque<(CrossChainMessage, u64)>>,
}

impl MockQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[async_trait]
impl DurableQueue for MockQueue {
    async fn publish(&self, message: &CrossChainMessage) -> Result<(), QueueError> {
        self.inner.lock().push_back((message.clone(), 1));
        Ok(())
    }

    async fn next(&self, _group: &str) -> Result<Option<Delivery>, QueueError> {
        let mut guard = self.inner.lock();
        Ok(guard.pop_front().map(|(message, delivery_count)| Delivery { message, delivery_count }))
    }

    async fn ack(&self, _delivery: &Delivery) -> Result<(), QueueError> {
        Ok(())
    }

    async fn nak(&self, delivery: &Delivery, _delay: Duration) -> Result<(), QueueError> {
        self.inner.lock().push_back((delivery.message.clone(), delivery.delivery_count + 1));
        Ok(())
    }

    async fn terminate(&self, _delivery: &Delivery) -> Result<(), QueueError> {
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.inner.lock().len() as u64)
    }
}
