//! Shared types for banter jobs, chunks, and status reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a job, assigned by the producer before enqueue.
pub type JobId = Uuid;
/// Unique identifier for a persisted history message.
pub type MessageId = Uuid;
/// Identifier for one conversation, private or group chat.
pub type ConversationId = String;
/// Store-assigned position of an entry within a conversation's log.
pub type LogEntryId = u64;

/// The unit of work appended to a conversation's log.
///
/// Write-once: the payload is immutable after enqueue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    /// Unique id for the job.
    pub job_id: JobId,
    /// Conversation the job belongs to.
    pub conversation_id: ConversationId,
    /// Job kind and its required fields.
    pub payload: JobPayload,
    /// Timestamp when the producer enqueued the job.
    pub enqueued_at: DateTime<Utc>,
}

/// Closed set of job kinds, decoded at the enqueue boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum JobPayload {
    /// Plain text message.
    Text {
        message: String,
        #[serde(default)]
        sender_name: Option<String>,
    },
    /// Text message with an image attachment reference.
    Image {
        message: String,
        #[serde(default)]
        sender_name: Option<String>,
        mimetype: String,
        data_ref: String,
    },
    /// Text message with a document attachment reference.
    Document {
        message: String,
        #[serde(default)]
        sender_name: Option<String>,
        document_id: String,
        filename: String,
        path: String,
    },
}

impl JobPayload {
    /// Message text shared by every payload kind.
    pub fn message(&self) -> &str {
        match self {
            JobPayload::Text { message, .. }
            | JobPayload::Image { message, .. }
            | JobPayload::Document { message, .. } => message,
        }
    }

    /// Display name of the sender, when known.
    pub fn sender_name(&self) -> Option<&str> {
        match self {
            JobPayload::Text { sender_name, .. }
            | JobPayload::Image { sender_name, .. }
            | JobPayload::Document { sender_name, .. } => sender_name.as_deref(),
        }
    }
}

/// One increment of a job's streamed output.
///
/// Indices are contiguous from zero, assigned by the single processing task
/// for the job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Zero-based position in the job's output.
    pub index: usize,
    /// Text fragment.
    pub content: String,
    /// Timestamp when the fragment was relayed.
    pub timestamp: DateTime<Utc>,
}

/// Completion record for a job.
///
/// Written once, after all chunks; its presence is the sole signal that the
/// job is complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobMetadata {
    /// Job the record belongs to.
    pub job_id: JobId,
    /// Conversation the job belonged to.
    pub conversation_id: ConversationId,
    /// Total number of chunks relayed for the job.
    pub total_chunks: usize,
    /// Reference to the persisted assistant message.
    pub message_id: MessageId,
    /// Timestamp when the job completed.
    pub created_at: DateTime<Utc>,
}

/// Sender role for a stored conversation message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Inbound user message.
    User,
    /// Generated assistant reply.
    Assistant,
    /// System-injected message.
    System,
}

/// Observable state of a job, derived from relay contents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Not yet picked up by a processor, or unknown job id.
    Queued,
    /// A processor has picked the job up.
    InProgress,
    /// Completion metadata exists.
    Complete,
}

/// Point-in-time view of a job, assembled from relay contents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshot {
    /// Job the snapshot describes.
    pub job_id: JobId,
    /// Derived status.
    pub status: JobStatus,
    /// Chunks relayed so far, in index order.
    pub chunks: Vec<Chunk>,
    /// Total chunk count, present once complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
    /// Concatenated response, present once complete with chunks available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_response: Option<String>,
}

/// Events yielded by a job status stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum JobEvent {
    /// One streamed fragment.
    Chunk { index: usize, content: String },
    /// Terminal success event.
    Done {
        total_chunks: usize,
        #[serde(default)]
        full_response: Option<String>,
    },
    /// Terminal failure event.
    Error { message: String },
}
