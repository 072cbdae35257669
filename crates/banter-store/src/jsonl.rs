//! Durable conversation log backed by a JSONL event file.

use crate::error::StoreError;
use crate::stream::ConversationLog;
use async_trait::async_trait;
use banter_protocol::{ConversationId, JobRecord, LogEntryId};
use log::{debug, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

const SCHEMA_VERSION: u32 = 1;

/// Append-only event representation for the log file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum LogEvent {
    SchemaVersion {
        version: u32,
    },
    Enqueued {
        entry_id: LogEntryId,
        record: JobRecord,
    },
    Acked {
        conversation_id: ConversationId,
        entry_id: LogEntryId,
    },
}

/// One replayed entry awaiting acknowledgment.
#[derive(Debug)]
struct PendingEntry {
    id: LogEntryId,
    record: JobRecord,
    delivered: bool,
}

#[derive(Debug, Default)]
struct ReplayedLog {
    next_id: LogEntryId,
    entries: Vec<PendingEntry>,
}

#[derive(Default)]
struct Inner {
    logs: HashMap<ConversationId, ReplayedLog>,
}

impl Inner {
    fn apply(&mut self, event: LogEvent) -> Result<(), StoreError> {
        match event {
            LogEvent::SchemaVersion { version } => {
                if version > SCHEMA_VERSION {
                    return Err(StoreError::UnsupportedSchema(version));
                }
            }
            LogEvent::Enqueued { entry_id, record } => {
                let state = self
                    .logs
                    .entry(record.conversation_id.clone())
                    .or_default();
                state.next_id = state.next_id.max(entry_id + 1);
                state.entries.push(PendingEntry {
                    id: entry_id,
                    record,
                    delivered: false,
                });
            }
            LogEvent::Acked {
                conversation_id,
                entry_id,
            } => {
                if let Some(state) = self.logs.get_mut(&conversation_id) {
                    state.entries.retain(|entry| entry.id != entry_id);
                }
            }
        }
        Ok(())
    }
}

/// File-backed implementation of [`ConversationLog`].
///
/// Every enqueue and acknowledgment is appended as one JSONL event; opening
/// the store replays the file into memory. Delivery state is not persisted,
/// so entries that were delivered but never acknowledged are redelivered
/// after a restart, giving at-least-once semantics across process crashes.
pub struct JsonlConversationLog {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl JsonlConversationLog {
    /// Open the log at `path`, replaying any existing events.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut inner = Inner::default();
        if path.exists() {
            let file = OpenOptions::new().read(true).open(&path)?;
            let reader = BufReader::new(file);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let event: LogEvent = serde_json::from_str(&line)?;
                inner.apply(event)?;
            }
        } else {
            let mut file = OpenOptions::new().create_new(true).write(true).open(&path)?;
            let header = serde_json::to_string(&LogEvent::SchemaVersion {
                version: SCHEMA_VERSION,
            })?;
            writeln!(file, "{header}")?;
        }

        let pending: usize = inner.logs.values().map(|state| state.entries.len()).sum();
        info!(
            "opened conversation log (path={}, conversations={}, pending={})",
            path.display(),
            inner.logs.len(),
            pending
        );
        Ok(Self {
            path,
            inner: Mutex::new(inner),
        })
    }

    /// Append one event line to the log file.
    ///
    /// Callers hold the inner lock, which serializes writers.
    fn append_line(&self, event: &LogEvent) -> Result<(), StoreError> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        let line = serde_json::to_string(event)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

#[async_trait]
impl ConversationLog for JsonlConversationLog {
    async fn append(
        &self,
        conversation_id: &str,
        record: &JobRecord,
    ) -> Result<LogEntryId, StoreError> {
        let mut inner = self.inner.lock();
        let entry_id = inner
            .logs
            .get(conversation_id)
            .map(|state| state.next_id)
            .unwrap_or(0);
        self.append_line(&LogEvent::Enqueued {
            entry_id,
            record: record.clone(),
        })?;

        let state = inner.logs.entry(conversation_id.to_string()).or_default();
        state.next_id = entry_id + 1;
        state.entries.push(PendingEntry {
            id: entry_id,
            record: record.clone(),
            delivered: false,
        });
        debug!(
            "persisted log entry (conversation_id={}, entry_id={})",
            conversation_id, entry_id
        );
        Ok(entry_id)
    }

    async fn read_next(
        &self,
        conversation_id: &str,
        max_count: usize,
    ) -> Result<Vec<(LogEntryId, JobRecord)>, StoreError> {
        let mut inner = self.inner.lock();
        let Some(state) = inner.logs.get_mut(conversation_id) else {
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
        let mut inner = self.inner.lock();
        let Some(state) = inner.logs.get_mut(conversation_id) else {
            return Ok(());
        };
        if !state.entries.iter().any(|entry| entry.id == entry_id) {
            return Ok(());
        }
        self.append_line(&LogEvent::Acked {
            conversation_id: conversation_id.to_string(),
            entry_id,
        })?;
        state.entries.retain(|entry| entry.id != entry_id);
        Ok(())
    }

    async fn pending_and_backlog_size(&self, conversation_id: &str) -> Result<usize, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .logs
            .get(conversation_id)
            .map(|state| state.entries.len())
            .unwrap_or(0))
    }

    async fn conversations(&self) -> Result<Vec<ConversationId>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.logs.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use banter_protocol::JobPayload;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn record(conversation_id: &str, message: &str) -> JobRecord {
        JobRecord {
            job_id: Uuid::new_v4(),
            conversation_id: conversation_id.to_string(),
            payload: JobPayload::Text {
                message: message.to_string(),
                sender_name: None,
            },
            enqueued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn acknowledged_entries_stay_gone_after_reopen() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("queue.jsonl");
        {
            let store = JsonlConversationLog::open(&path).expect("open");
            store.append("u1", &record("u1", "one")).await.expect("append");
            store.append("u1", &record("u1", "two")).await.expect("append");
            let (entry_id, _) = store.read_next("u1", 1).await.expect("read")[0].clone();
            store.acknowledge("u1", entry_id).await.expect("ack");
        }

        let store = JsonlConversationLog::open(&path).expect("reopen");
        assert_eq!(store.pending_and_backlog_size("u1").await.expect("size"), 1);
        let batch = store.read_next("u1", 2).await.expect("read");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].1.payload.message(), "two");
    }

    #[tokio::test]
    async fn unacknowledged_entries_are_redelivered_after_reopen() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("queue.jsonl");
        let delivered_id;
        {
            let store = JsonlConversationLog::open(&path).expect("open");
            store.append("u1", &record("u1", "one")).await.expect("append");
            let batch = store.read_next("u1", 1).await.expect("read");
            delivered_id = batch[0].0;
            // Delivered within this process, so not redelivered here.
            assert_eq!(store.read_next("u1", 1).await.expect("read"), Vec::new());
        }

        let store = JsonlConversationLog::open(&path).expect("reopen");
        let batch = store.read_next("u1", 1).await.expect("read");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].0, delivered_id);
    }

    #[tokio::test]
    async fn entry_ids_continue_after_reopen() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("queue.jsonl");
        {
            let store = JsonlConversationLog::open(&path).expect("open");
            store.append("u1", &record("u1", "one")).await.expect("append");
            let (entry_id, _) = store.read_next("u1", 1).await.expect("read")[0].clone();
            store.acknowledge("u1", entry_id).await.expect("ack");
        }

        let store = JsonlConversationLog::open(&path).expect("reopen");
        let entry_id = store.append("u1", &record("u1", "two")).await.expect("append");
        assert_eq!(entry_id, 1);
    }

    #[tokio::test]
    async fn acknowledge_unknown_entry_is_a_no_op() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("queue.jsonl");
        let store = JsonlConversationLog::open(&path).expect("open");
        store.acknowledge("u1", 7).await.expect("ack");
        assert_eq!(store.pending_and_backlog_size("u1").await.expect("size"), 0);
    }

    #[tokio::test]
    async fn open_rejects_newer_schema_versions() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("queue.jsonl");
        fs::write(&path, "{\"type\":\"schema_version\",\"version\":99}\n").expect("write");

        let err = JsonlConversationLog::open(&path)
            .err()
            .expect("open should fail");
        assert!(matches!(err, StoreError::UnsupportedSchema(99)));
    }
}
