//! The per-conversation stream of pending job records.

use crate::error::StoreError;
use async_trait::async_trait;
use banter_protocol::{ConversationId, JobRecord, LogEntryId};

/// Ordered log of pending job records, keyed by conversation.
///
/// Each conversation has its own totally ordered sequence with a single
/// logical consumer: an entry is delivered to at most one reader, stays
/// pending until acknowledged, and an acknowledged entry is never
/// redelivered. Keying by conversation makes per-conversation ordering a
/// structural property of the store rather than an application-level lock.
///
/// Redelivery of delivered-but-unacknowledged entries is a liveness concern
/// left to the backend. The in-memory store never redelivers within a
/// process; the JSONL store redelivers unacknowledged entries on restart
/// because delivery state is deliberately not persisted.
#[async_trait]
pub trait ConversationLog: Send + Sync {
    /// Append a job record to the conversation's log.
    ///
    /// Never blocks on downstream processing; fails only when the store
    /// itself is unavailable.
    async fn append(
        &self,
        conversation_id: &str,
        record: &JobRecord,
    ) -> Result<LogEntryId, StoreError>;

    /// Read up to `max_count` undelivered entries, oldest first.
    ///
    /// Returns an empty list when nothing is pending delivery.
    async fn read_next(
        &self,
        conversation_id: &str,
        max_count: usize,
    ) -> Result<Vec<(LogEntryId, JobRecord)>, StoreError>;

    /// Mark a delivered entry as done. Idempotent.
    async fn acknowledge(
        &self,
        conversation_id: &str,
        entry_id: LogEntryId,
    ) -> Result<(), StoreError>;

    /// Count of delivered-but-unacknowledged plus never-delivered entries.
    async fn pending_and_backlog_size(&self, conversation_id: &str) -> Result<usize, StoreError>;

    /// List every conversation id known to the log.
    async fn conversations(&self) -> Result<Vec<ConversationId>, StoreError>;
}
