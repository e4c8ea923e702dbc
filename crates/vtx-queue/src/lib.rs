//! Redis Streams job queue.
//!
//! This crate provides:
//! - The `JobQueuePort` dispatch interface used by workers and the API
//! - A Redis Streams implementation with consumer groups, stalled-delivery
//!   reclaim and a dead letter stream
//! - An in-memory implementation for tests and single-process runs
//!
//! Delivery is at-least-once. Workers tolerate duplicates through job leases
//! and checkpoints, so the queue does not try to be exactly-once.

pub mod error;
pub mod job;
pub mod memory;
pub mod port;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use job::{ConvertVideoJob, Delivery};
pub use memory::MemoryJobQueue;
pub use port::JobQueuePort;
pub use queue::{QueueConfig, RedisJobQueue};
