//! Ephemeral chunk and completion state, keyed by job id.

use crate::error::StoreError;
use async_trait::async_trait;
use banter_protocol::{Chunk, JobId, JobMetadata};
use chrono::{DateTime, Utc};

/// Ephemeral per-job state bridging the background processor and the
/// HTTP-facing status endpoints.
///
/// Holds an append-only chunk list, a started marker, and a completion
/// metadata record, all evicted together after a configured time window from
/// the last write. The processor is the only writer for a given job, so
/// chunk ordering needs no coordination; readers may poll at any time.
#[async_trait]
pub trait JobRelay: Send + Sync {
    /// Append a chunk to the job's output trail and refresh its TTL window.
    async fn append_chunk(&self, job_id: JobId, chunk: &Chunk) -> Result<(), StoreError>;

    /// List chunks with `index >= from_index`, in index order.
    async fn list_chunks(&self, job_id: JobId, from_index: usize) -> Result<Vec<Chunk>, StoreError>;

    /// Record that a processor picked the job up.
    async fn mark_started(&self, job_id: JobId) -> Result<(), StoreError>;

    /// Pickup timestamp, if the job was started within the TTL window.
    async fn started_at(&self, job_id: JobId) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Write the completion metadata record.
    ///
    /// Callers write this at most once per job, only after all chunks.
    async fn set_metadata(&self, metadata: &JobMetadata) -> Result<(), StoreError>;

    /// Completion metadata, if the job finished within the TTL window.
    async fn get_metadata(&self, job_id: JobId) -> Result<Option<JobMetadata>, StoreError>;

    /// Drop all relay state for a job.
    async fn delete_all(&self, job_id: JobId) -> Result<(), StoreError>;
}
