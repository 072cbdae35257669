//! Per-conversation message history.
//!
//! History is what the agent sees as context, distinct from the conversation
//! log that orders pending jobs. Two backends are provided: an in-memory
//! store and a JSONL file store that replays on open.

use async_trait::async_trait;
use banter_protocol::{ConversationId, MessageId, Role};
use chrono::{DateTime, Utc};
use log::{debug, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

const SCHEMA_VERSION: u32 = 1;

/// One message stored in a conversation's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Errors raised by history stores.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// The underlying file could not be read or written.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A persisted message could not be encoded or decoded.
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    /// The on-disk history was written by a newer schema.
    #[error("unsupported history schema version {0}")]
    UnsupportedSchema(u32),
}

/// Read and append access to per-conversation message history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Return up to `limit` most recent messages, oldest first.
    async fn recent(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, HistoryError>;

    /// Append one message and return its id.
    async fn append(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        sender_name: Option<&str>,
    ) -> Result<MessageId, HistoryError>;
}

fn new_message(role: Role, content: &str, sender_name: Option<&str>) -> StoredMessage {
    StoredMessage {
        id: Uuid::new_v4(),
        role,
        content: content.to_string(),
        sender_name: sender_name.map(|name| name.to_string()),
        created_at: Utc::now(),
    }
}

/// In-memory implementation of [`HistoryStore`].
#[derive(Default)]
pub struct MemoryHistoryStore {
    conversations: Mutex<HashMap<ConversationId, Vec<StoredMessage>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message stored for a conversation, oldest first.
    pub fn messages(&self, conversation_id: &str) -> Vec<StoredMessage> {
        self.conversations
            .lock()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn recent(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, HistoryError> {
        let conversations = self.conversations.lock();
        let Some(messages) = conversations.get(conversation_id) else {
            return Ok(Vec::new());
        };
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }

    async fn append(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        sender_name: Option<&str>,
    ) -> Result<MessageId, HistoryError> {
        let message = new_message(role, content, sender_name);
        let message_id = message.id;
        self.conversations
            .lock()
            .entry(conversation_id.to_string())
            .or_default()
            .push(message);
        Ok(message_id)
    }
}

/// Append-only event representation for the history file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HistoryEvent {
    SchemaVersion {
        version: u32,
    },
    Message {
        conversation_id: ConversationId,
        message: StoredMessage,
    },
}

/// File-backed implementation of [`HistoryStore`].
///
/// Messages are cached in memory and appended to a JSONL event file, which
/// is replayed on open.
pub struct JsonlHistoryStore {
    path: PathBuf,
    inner: Mutex<HashMap<ConversationId, Vec<StoredMessage>>>,
}

impl JsonlHistoryStore {
    /// Open the history at `path`, replaying any existing events.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut conversations: HashMap<ConversationId, Vec<StoredMessage>> = HashMap::new();
        if path.exists() {
            let file = OpenOptions::new().read(true).open(&path)?;
            let reader = BufReader::new(file);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str(&line)? {
                    HistoryEvent::SchemaVersion { version } => {
                        if version > SCHEMA_VERSION {
                            return Err(HistoryError::UnsupportedSchema(version));
                        }
                    }
                    HistoryEvent::Message {
                        conversation_id,
                        message,
                    } => {
                        conversations.entry(conversation_id).or_default().push(message);
                    }
                }
            }
        } else {
            let mut file = OpenOptions::new().create_new(true).write(true).open(&path)?;
            let header = serde_json::to_string(&HistoryEvent::SchemaVersion {
                version: SCHEMA_VERSION,
            })?;
            writeln!(file, "{header}")?;
        }

        info!(
            "opened history store (path={}, conversations={})",
            path.display(),
            conversations.len()
        );
        Ok(Self {
            path,
            inner: Mutex::new(conversations),
        })
    }
}

#[async_trait]
impl HistoryStore for JsonlHistoryStore {
    async fn recent(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, HistoryError> {
        let inner = self.inner.lock();
        let Some(messages) = inner.get(conversation_id) else {
            return Ok(Vec::new());
        };
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }

    async fn append(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        sender_name: Option<&str>,
    ) -> Result<MessageId, HistoryError> {
        let message = new_message(role, content, sender_name);
        let message_id = message.id;
        let mut inner = self.inner.lock();

        let event = HistoryEvent::Message {
            conversation_id: conversation_id.to_string(),
            message: message.clone(),
        };
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        let line = serde_json::to_string(&event)?;
        writeln!(file, "{line}")?;

        inner
            .entry(conversation_id.to_string())
            .or_default()
            .push(message);
        debug!(
            "persisted history message (conversation_id={}, message_id={})",
            conversation_id, message_id
        );
        Ok(message_id)
    }
}
