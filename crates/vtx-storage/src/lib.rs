//! Durable storage for the VTX pipeline.
//!
//! This crate provides:
//! - The `BlobStore` port with R2, local filesystem and in-memory adapters
//! - Conditional writes used for leases and checkpoints
//! - Job, checkpoint and lease repositories on top of any blob store
//! - Artifact page and manifest I/O

pub mod artifacts;
pub mod blob;
pub mod error;
pub mod fs;
pub mod keys;
pub mod memory;
pub mod r2;
pub mod state;

pub use artifacts::ArtifactStore;
pub use blob::{Blob, BlobStore, Precondition};
pub use error::{StorageError, StorageResult};
pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;
pub use r2::{R2BlobStore, R2Config};
pub use state::{BlobStateStore, CheckpointStore, JobRepository, LeaseOutcome};
