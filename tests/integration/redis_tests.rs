//! Redis/Queue integration tests.

use vtx_models::JobId;
use vtx_queue::{ConvertVideoJob, JobQueuePort, QueueError, RedisJobQueue};

async fn queue() -> RedisJobQueue {
    dotenvy::dotenv().ok();

    let queue = RedisJobQueue::from_env().expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");
    queue
}

/// Test Redis connection and basic operations.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_connection() {
    let queue = queue().await;
    queue
        .check_connectivity()
        .await
        .expect("Failed to reach Redis");

    let len = queue.len().await.expect("Failed to get queue length");
    println!("Queue length: {}", len);
}

/// Test job enqueue, consume and ack cycle.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_job_enqueue_consume_ack() {
    let queue = queue().await;

    let job = ConvertVideoJob::new(JobId::new());
    let job_id = job.job_id.clone();

    let message_id = queue.enqueue(job).await.expect("Failed to enqueue");
    println!("Enqueued job {} with message ID {}", job_id, message_id);

    let deliveries = queue
        .consume("test-consumer", 1000, 10)
        .await
        .expect("Failed to consume");
    let delivery = deliveries
        .iter()
        .find(|d| d.job.job_id == job_id)
        .expect("enqueued job was not delivered");

    queue.ack(&delivery.message_id).await.expect("Failed to ack");
}

/// The same job cannot be queued twice while its dedup key lives.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_duplicate_enqueue_rejected() {
    let queue = queue().await;

    let job_id = JobId::new();
    queue
        .enqueue(ConvertVideoJob::new(job_id.clone()))
        .await
        .expect("Failed to enqueue");

    match queue.enqueue(ConvertVideoJob::new(job_id)).await {
        Err(QueueError::Duplicate(_)) => {}
        other => panic!("expected duplicate rejection, got {:?}", other),
    }
}

/// Test DLQ functionality.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_dlq() {
    let queue = queue().await;

    let job_id = JobId::new();
    queue
        .enqueue(ConvertVideoJob::new(job_id.clone()))
        .await
        .expect("Failed to enqueue");

    let deliveries = queue
        .consume("test-dlq-consumer", 1000, 10)
        .await
        .expect("Failed to consume");
    let delivery = deliveries
        .into_iter()
        .find(|d| d.job.job_id == job_id)
        .expect("enqueued job was not delivered");

    let before = queue.dlq_len().await.expect("Failed to get DLQ length");
    queue
        .dead_letter(&delivery, "Test error")
        .await
        .expect("Failed to move to DLQ");

    let after = queue.dlq_len().await.expect("Failed to get DLQ length");
    assert_eq!(after, before + 1);
}
