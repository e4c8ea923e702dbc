//! Object key layout.
//!
//! ```text
//! jobs/{job_id}/job.json
//! jobs/{job_id}/checkpoint.json
//! jobs/{job_id}/lease.json
//! artifacts/{job_id}/{artifact_id}/manifest.json
//! artifacts/{job_id}/{artifact_id}/pages/{frame:08}.jpg
//! ```

use vtx_models::{ArtifactId, JobId};

use crate::error::{StorageError, StorageResult};

pub fn job(job_id: &JobId) -> String {
    format!("jobs/{}/job.json", job_id)
}

pub fn checkpoint(job_id: &JobId) -> String {
    format!("jobs/{}/checkpoint.json", job_id)
}

pub fn lease(job_id: &JobId) -> String {
    format!("jobs/{}/lease.json", job_id)
}

pub fn artifact_prefix(job_id: &JobId, artifact_id: &ArtifactId) -> String {
    format!("artifacts/{}/{}/", job_id, artifact_id)
}

pub fn manifest(job_id: &JobId, artifact_id: &ArtifactId) -> String {
    format!("{}manifest.json", artifact_prefix(job_id, artifact_id))
}

/// Page blob for one frame. Keying by frame index makes a replayed write
/// overwrite instead of duplicate.
pub fn page(job_id: &JobId, artifact_id: &ArtifactId, frame: u64) -> String {
    format!("{}pages/{:08}.jpg", artifact_prefix(job_id, artifact_id), frame)
}

/// Reject ids that would escape their key prefix.
pub fn validate_id(id: &str) -> StorageResult<()> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_keys_sort_by_frame() {
        let job_id = JobId::from_string("j");
        let artifact = ArtifactId::for_segment(&job_id, 0);
        let a = page(&job_id, &artifact, 9);
        let b = page(&job_id, &artifact, 10);
        assert!(a < b);
        assert_eq!(a, "artifacts/j/j-s000/pages/00000009.jpg");
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("2f1c-aa_01").is_ok());
        assert!(validate_id("../etc").is_err());
        assert!(validate_id("").is_err());
    }
}
