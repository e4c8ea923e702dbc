//! In-process job queue.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::{QueueError, QueueResult};
use crate::job::{ConvertVideoJob, Delivery};
use crate::port::JobQueuePort;

#[derive(Debug)]
struct InFlight {
    job: ConvertVideoJob,
    consumer: String,
    delivered_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    waiting: VecDeque<(String, ConvertVideoJob)>,
    in_flight: BTreeMap<String, InFlight>,
    seen: HashSet<String>,
    dead: Vec<(Delivery, String)>,
}

/// Queue with consumer-group semantics held in memory.
///
/// Mirrors the Redis implementation closely enough for worker tests:
/// deliveries stay in flight until acked and can be reclaimed by another
/// consumer once idle.
#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    state: Mutex<State>,
    notify: Notify,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Messages parked as dead letters, with their error.
    pub fn dead_letters(&self) -> Vec<(Delivery, String)> {
        self.lock().dead.clone()
    }

    pub fn in_flight_len(&self) -> usize {
        self.lock().in_flight.len()
    }

    fn take(&self, consumer: &str, count: usize) -> Vec<Delivery> {
        let mut state = self.lock();
        let mut out = Vec::new();
        while out.len() < count {
            let Some((message_id, job)) = state.waiting.pop_front() else {
                break;
            };
            state.in_flight.insert(
                message_id.clone(),
                InFlight {
                    job: job.clone(),
                    consumer: consumer.to_string(),
                    delivered_at: Instant::now(),
                },
            );
            out.push(Delivery { message_id, job });
        }
        out
    }
}

#[async_trait]
impl JobQueuePort for MemoryJobQueue {
    async fn enqueue(&self, job: ConvertVideoJob) -> QueueResult<String> {
        let message_id = {
            let mut state = self.lock();
            let key = job.idempotency_key();
            if !state.seen.insert(key.clone()) {
                return Err(QueueError::Duplicate(key));
            }
            state.next_id += 1;
            let message_id = format!("{}-0", state.next_id);
            state.waiting.push_back((message_id.clone(), job));
            message_id
        };
        self.notify.notify_waiters();
        Ok(message_id)
    }

    async fn consume(
        &self,
        consumer: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let deliveries = self.take(consumer, count);
        if !deliveries.is_empty() || block_ms == 0 {
            return Ok(deliveries);
        }
        let _ = tokio::time::timeout(Duration::from_millis(block_ms), self.notify.notified()).await;
        Ok(self.take(consumer, count))
    }

    async fn claim_pending(
        &self,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let min_idle = Duration::from_millis(min_idle_ms);
        let mut state = self.lock();
        let mut out = Vec::new();
        for (message_id, flight) in state.in_flight.iter_mut() {
            if out.len() >= count {
                break;
            }
            if flight.delivered_at.elapsed() >= min_idle {
                flight.consumer = consumer.to_string();
                flight.delivered_at = Instant::now();
                out.push(Delivery {
                    message_id: message_id.clone(),
                    job: flight.job.clone(),
                });
            }
        }
        Ok(out)
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        self.lock().in_flight.remove(message_id);
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        let mut state = self.lock();
        state.in_flight.remove(&delivery.message_id);
        state.dead.push((delivery.clone(), error.to_string()));
        Ok(())
    }

    async fn len(&self) -> QueueResult<u64> {
        let state = self.lock();
        Ok((state.waiting.len() + state.in_flight.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtx_models::JobId;

    #[tokio::test]
    async fn test_unacked_delivery_can_be_reclaimed() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(ConvertVideoJob::new(JobId::new())).await.unwrap();

        let first = queue.consume("worker-a", 0, 10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(queue.consume("worker-b", 0, 10).await.unwrap().is_empty());

        let reclaimed = queue.claim_pending("worker-b", 0, 10).await.unwrap();
        assert_eq!(reclaimed[0].message_id, first[0].message_id);

        queue.ack(&first[0].message_id).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_idle_threshold_respected() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(ConvertVideoJob::new(JobId::new())).await.unwrap();
        queue.consume("worker-a", 0, 1).await.unwrap();
        assert!(queue
            .claim_pending("worker-b", 60_000, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_rejected() {
        let queue = MemoryJobQueue::new();
        let job = ConvertVideoJob::new(JobId::new());
        queue.enqueue(job.clone()).await.unwrap();
        assert!(matches!(
            queue.enqueue(job).await,
            Err(QueueError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_dead_letter_removes_from_flight() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(ConvertVideoJob::new(JobId::new())).await.unwrap();
        let delivery = queue.consume("w", 0, 1).await.unwrap().remove(0);
        queue.dead_letter(&delivery, "job record missing").await.unwrap();
        assert_eq!(queue.in_flight_len(), 0);
        assert_eq!(queue.dead_letters().len(), 1);
    }
}
