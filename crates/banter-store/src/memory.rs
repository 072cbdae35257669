//! In-process store backing both the conversation log and the job relay.

use crate::error::StoreError;
use crate::relay::JobRelay;
use crate::stream::ConversationLog;
use async_trait::async_trait;
use banter_protocol::{Chunk, ConversationId, JobId, JobMetadata, JobRecord, LogEntryId};
use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Default eviction window for relay state, measured from the last write.
pub const DEFAULT_CHUNK_TTL: Duration = Duration::from_secs(3600);

/// One log entry awaiting acknowledgment.
#[derive(Debug, Clone)]
struct LogEntry {
    id: LogEntryId,
    record: JobRecord,
    delivered: bool,
}

/// Per-conversation log state.
#[derive(Debug, Default)]
struct LogState {
    next_id: LogEntryId,
    entries: Vec<LogEntry>,
}

/// Per-job relay state with a shared eviction deadline.
#[derive(Debug)]
struct RelayState {
    chunks: Vec<Chunk>,
    started_at: Option<DateTime<Utc>>,
    metadata: Option<JobMetadata>,
    expires_at: Instant,
}

/// In-memory implementation of [`ConversationLog`] and [`JobRelay`].
///
/// Delivery state lives only in memory, so a delivered entry stays owned by
/// its reader until acknowledged. Relay state for a job expires as a unit
/// once its TTL window lapses; expired state is dropped lazily on read and
/// eagerly by [`MemoryStore::sweep`].
pub struct MemoryStore {
    logs: Mutex<HashMap<ConversationId, LogState>>,
    relay: Mutex<HashMap<JobId, RelayState>>,
    chunk_ttl: Duration,
}

impl MemoryStore {
    /// Create a store with the given relay TTL window.
    pub fn new(chunk_ttl: Duration) -> Self {
        Self {
            logs: Mutex::new(HashMap::new()),
            relay: Mutex::new(HashMap::new()),
            chunk_ttl,
        }
    }

    /// Drop relay state for every job whose TTL window has lapsed.
    ///
    /// Returns the number of jobs evicted.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut relay = self.relay.lock();
        let before = relay.len();
        relay.retain(|_, state| state.expires_at > now);
        let evicted = before - relay.len();
        if evicted > 0 {
            debug!("swept expired relay state (jobs={evicted})");
        }
        evicted
    }

    /// Run `f` against the job's relay state unless it has expired.
    fn with_live_relay<T>(&self, job_id: JobId, f: impl FnOnce(&RelayState) -> T) -> Option<T> {
        let mut relay = self.relay.lock();
        match relay.get(&job_id) {
            Some(state) if state.expires_at > Instant::now() => Some(f(state)),
            Some(_) => {
                relay.remove(&job_id);
                None
            }
            None => None,
        }
    }

    /// Mutate the job's relay state, creating or resurrecting it as empty
    /// when absent or expired, and refresh the TTL window.
    fn write_relay(&self, job_id: JobId, f: impl FnOnce(&mut RelayState)) {
        let mut relay = self.relay.lock();
        let now = Instant::now();
        let state = relay.entry(job_id).or_insert_with(|| RelayState {
            chunks: Vec::new(),
            started_at: None,
            metadata: None,
            expires_at: now + self.chunk_ttl,
        });
        if state.expires_at <= now {
            state.chunks.clear();
            state.started_at = None;
            state.metadata = None;
        }
        f(state);
        state.expires_at = now + self.chunk_ttl;
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_TTL)
    }
}

#[async_trait]
impl ConversationLog for MemoryStore {
    async fn append(
        &self,
        conversation_id: &str,
        record: &JobRecord,
    ) -> Result<LogEntryId, StoreError> {
        let mut logs = self.logs.lock();
        let state = logs.entry(conversation_id.to_string()).or_default();
        let entry_id = state.next_id;
        state.next_id += 1;
        state.entries.push(LogEntry {
            id: entry_id,
            record: record.clone(),
            delivered: false,
        });
        Ok(entry_id)
    }

    async fn read_next(
        &self,
        conversation_id: &str,
        max_count: usize,
    ) -> Result<Vec<(LogEntryId, JobRecord)>, StoreError> {
        let mut logs = self.logs.lock();
        let Some(state) = logs.get_mut(conversation_id) else {
            return Ok(Vec::new());
        };
        let mut delivered = Vec::new();
        for entry in state.entries.iter_mut() {
            if delivered.len() == max_count {
                break;
            }
            if !entry.delivered {
                entry.delivered = true;
                delivered.push((entry.id, entry.record.clone()));
            }
        }
        Ok(delivered)
    }

    async fn acknowledge(
        &self,
        conversation_id: &str,
        entry_id: LogEntryId,
    ) -> Result<(), StoreError> {
        let mut logs = self.logs.lock();
        if let Some(state) = logs.get_mut(conversation_id) {
            state.entries.retain(|entry| entry.id != entry_id);
        }
        Ok(())
    }

    async fn pending_and_backlog_size(&self, conversation_id: &str) -> Result<usize, StoreError> {
        let logs = self.logs.lock();
        Ok(logs
            .get(conversation_id)
            .map(|state| state.entries.len())
            .unwrap_or(0))
    }

    async fn conversations(&self) -> Result<Vec<ConversationId>, StoreError> {
        let logs = self.logs.lock();
        Ok(logs.keys().cloned().collect())
    }
}

#[async_trait]
impl JobRelay for MemoryStore {
    async fn append_chunk(&self, job_id: JobId, chunk: &Chunk) -> Result<(), StoreError> {
        self.write_relay(job_id, |state| state.chunks.push(chunk.clone()));
        Ok(())
    }

    async fn list_chunks(
        &self,
        job_id: JobId,
        from_index: usize,
    ) -> Result<Vec<Chunk>, StoreError> {
        Ok(self
            .with_live_relay(job_id, |state| {
                state
                    .chunks
                    .iter()
                    .filter(|chunk| chunk.index >= from_index)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn mark_started(&self, job_id: JobId) -> Result<(), StoreError> {
        self.write_relay(job_id, |state| state.started_at = Some(Utc::now()));
        Ok(())
    }

    async fn started_at(&self, job_id: JobId) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .with_live_relay(job_id, |state| state.started_at)
            .flatten())
    }

    async fn set_metadata(&self, metadata: &JobMetadata) -> Result<(), StoreError> {
        self.write_relay(metadata.job_id, |state| {
            state.metadata = Some(metadata.clone())
        });
        Ok(())
    }

    async fn get_metadata(&self, job_id: JobId) -> Result<Option<JobMetadata>, StoreError> {
        Ok(self
            .with_live_relay(job_id, |state| state.metadata.clone())
            .flatten())
    }

    async fn delete_all(&self, job_id: JobId) -> Result<(), StoreError> {
        self.relay.lock().remove(&job_id);
        Ok(())
    }
}
