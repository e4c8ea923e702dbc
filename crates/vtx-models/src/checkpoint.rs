//! Durable progress and ownership records.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::JobId;

/// Last frame index whose page is durably part of its artifact.
///
/// One record per job; only ever moves forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Checkpoint {
    pub job_id: JobId,
    pub last_completed_frame: u64,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(job_id: JobId, last_completed_frame: u64) -> Self {
        Self {
            job_id,
            last_completed_frame,
            updated_at: Utc::now(),
        }
    }

    /// First frame the next run must process.
    pub fn resume_frame(&self) -> u64 {
        self.last_completed_frame + 1
    }
}

/// Time-bounded claim granting one worker exclusive processing rights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Lease {
    pub job_id: JobId,
    /// Worker that holds the lease
    pub holder: String,
    /// Fencing token, regenerated on every acquisition
    pub token: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(job_id: JobId, holder: impl Into<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            holder: holder.into(),
            token: Uuid::new_v4().to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Same acquisition (holder and fencing token match).
    pub fn same_claim(&self, other: &Lease) -> bool {
        self.holder == other.holder && self.token == other.token
    }

    /// Extend the expiry from now.
    pub fn renewed(&self, ttl: Duration) -> Self {
        Self {
            expires_at: Utc::now() + ttl,
            ..self.clone()
        }
    }
}
