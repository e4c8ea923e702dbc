//! Dispatch interface.

use async_trait::async_trait;

use crate::error::QueueResult;
use crate::job::{ConvertVideoJob, Delivery};

/// At-least-once job dispatch.
#[async_trait]
pub trait JobQueuePort: Send + Sync {
    /// Add a job; returns the message id.
    async fn enqueue(&self, job: ConvertVideoJob) -> QueueResult<String>;

    /// Receive new messages for `consumer`, waiting up to `block_ms`.
    async fn consume(
        &self,
        consumer: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>>;

    /// Take over messages delivered to other consumers and left unacked for
    /// at least `min_idle_ms`.
    async fn claim_pending(
        &self,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>>;

    /// Mark a message as handled.
    async fn ack(&self, message_id: &str) -> QueueResult<()>;

    /// Park a message that can never succeed.
    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<()>;

    /// Messages not yet acked (waiting or in flight).
    async fn len(&self) -> QueueResult<u64>;
}
