//! Client-facing chat operations: enqueue, status, streaming, save.

use crate::error::CoreError;
use crate::history::HistoryStore;
use banter_protocol::{
    JobEvent, JobId, JobPayload, JobRecord, JobStatus, MessageId, Role, StatusSnapshot,
};
use banter_store::{ConversationLog, JobRelay, StoreError};
use chrono::Utc;
use futures_util::Stream;
use log::{debug, info};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(100);
const STREAM_EVENT_BUFFER: usize = 64;

/// Front door for enqueueing jobs and reading their status.
///
/// Enqueueing only records the job; processing happens in the dispatcher's
/// drain tasks, which is what keeps per-conversation ordering out of the
/// request path.
#[derive(Clone)]
pub struct ChatService {
    log: Arc<dyn ConversationLog>,
    relay: Arc<dyn JobRelay>,
    history: Arc<dyn HistoryStore>,
}

impl ChatService {
    pub fn new(
        log: Arc<dyn ConversationLog>,
        relay: Arc<dyn JobRelay>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self { log, relay, history }
    }

    /// Persist the inbound message to history and enqueue a processing job.
    pub async fn enqueue_job(
        &self,
        conversation_id: &str,
        payload: JobPayload,
    ) -> Result<JobId, CoreError> {
        self.history
            .append(
                conversation_id,
                Role::User,
                payload.message(),
                payload.sender_name(),
            )
            .await?;

        let record = JobRecord {
            job_id: Uuid::new_v4(),
            conversation_id: conversation_id.to_string(),
            payload,
            enqueued_at: Utc::now(),
        };
        let entry_id = self.log.append(conversation_id, &record).await?;
        info!(
            "job enqueued (job_id={}, conversation_id={conversation_id}, entry_id={entry_id})",
            record.job_id
        );
        Ok(record.job_id)
    }

    /// Current status snapshot for a job.
    pub async fn get_status(&self, job_id: JobId) -> Result<StatusSnapshot, CoreError> {
        Ok(build_snapshot(self.relay.as_ref(), job_id).await?)
    }

    /// Persist a message to history without enqueueing a job.
    pub async fn save_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        sender_name: Option<&str>,
    ) -> Result<MessageId, CoreError> {
        let message_id = self
            .history
            .append(conversation_id, role, content, sender_name)
            .await?;
        debug!("message saved (conversation_id={conversation_id}, message_id={message_id})");
        Ok(message_id)
    }

    /// Follow a job's output as it is produced.
    ///
    /// Emits one `Chunk` event per relay chunk with `index >= from_index`,
    /// then a final `Done` once completion metadata appears. A relay failure
    /// surfaces as a single `Error` event. The stream ends after `Done` or
    /// `Error`; dropping it stops the polling task.
    pub fn stream_status(&self, job_id: JobId, from_index: usize) -> JobStream {
        let (tx, rx) = mpsc::channel(STREAM_EVENT_BUFFER);
        let relay = Arc::clone(&self.relay);
        let handle = tokio::spawn(async move {
            let mut cursor = from_index;
            loop {
                if forward_chunks(relay.as_ref(), job_id, &mut cursor, &tx)
                    .await
                    .is_break()
                {
                    return;
                }

                match relay.get_metadata(job_id).await {
                    Ok(Some(metadata)) => {
                        // Chunks may land between the poll above and the
                        // metadata write; flush the remainder first.
                        if forward_chunks(relay.as_ref(), job_id, &mut cursor, &tx)
                            .await
                            .is_break()
                        {
                            return;
                        }
                        let full_response = match relay.list_chunks(job_id, 0).await {
                            Ok(chunks) if !chunks.is_empty() => Some(join_chunks(&chunks)),
                            _ => None,
                        };
                        let _ = tx
                            .send(JobEvent::Done {
                                total_chunks: metadata.total_chunks,
                                full_response,
                            })
                            .await;
                        return;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        let _ = tx
                            .send(JobEvent::Error {
                                message: err.to_string(),
                            })
                            .await;
                        return;
                    }
                }

                tokio::time::sleep(STREAM_POLL_INTERVAL).await;
            }
        });
        JobStream {
            job_id,
            receiver: rx,
            handle,
        }
    }
}

/// Send every chunk at or past the cursor, advancing it.
///
/// Breaks when the receiver is gone or the relay fails, after emitting the
/// error event.
async fn forward_chunks(
    relay: &dyn JobRelay,
    job_id: JobId,
    cursor: &mut usize,
    tx: &mpsc::Sender<JobEvent>,
) -> std::ops::ControlFlow<()> {
    match relay.list_chunks(job_id, *cursor).await {
        Ok(chunks) => {
            for chunk in chunks {
                *cursor = (*cursor).max(chunk.index + 1);
                let event = JobEvent::Chunk {
                    index: chunk.index,
                    content: chunk.content,
                };
                if tx.send(event).await.is_err() {
                    return std::ops::ControlFlow::Break(());
                }
            }
            std::ops::ControlFlow::Continue(())
        }
        Err(err) => {
            let _ = tx
                .send(JobEvent::Error {
                    message: err.to_string(),
                })
                .await;
            std::ops::ControlFlow::Break(())
        }
    }
}

fn join_chunks(chunks: &[banter_protocol::Chunk]) -> String {
    chunks
        .iter()
        .map(|chunk| chunk.content.as_str())
        .collect::<String>()
}

/// Infer a job's externally visible status from relay state.
///
/// Metadata present means complete; chunks or a started marker mean in
/// progress; a job the relay knows nothing about reads as queued, which also
/// covers jobs whose relay state already expired.
async fn build_snapshot(relay: &dyn JobRelay, job_id: JobId) -> Result<StatusSnapshot, StoreError> {
    let chunks = relay.list_chunks(job_id, 0).await?;
    if let Some(metadata) = relay.get_metadata(job_id).await? {
        let full_response = if chunks.is_empty() {
            None
        } else {
            Some(join_chunks(&chunks))
        };
        return Ok(StatusSnapshot {
            job_id,
            status: JobStatus::Complete,
            chunks,
            total_chunks: Some(metadata.total_chunks),
            full_response,
        });
    }

    let started = relay.started_at(job_id).await?.is_some();
    let status = if started || !chunks.is_empty() {
        JobStatus::InProgress
    } else {
        JobStatus::Queued
    };
    Ok(StatusSnapshot {
        job_id,
        status,
        chunks,
        total_chunks: None,
        full_response: None,
    })
}

/// Streaming handle for one job's relay events.
pub struct JobStream {
    /// Job this stream follows.
    pub job_id: JobId,
    receiver: mpsc::Receiver<JobEvent>,
    handle: JoinHandle<()>,
}

impl Stream for JobStream {
    type Item = JobEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<JobEvent>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for JobStream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryHistoryStore;
    use banter_protocol::{Chunk, JobMetadata};
    use banter_store::MemoryStore;
    use futures_util::StreamExt;
    use pretty_assertions::assert_eq;

    fn service(store: &Arc<MemoryStore>, history: &Arc<MemoryHistoryStore>) -> ChatService {
        ChatService::new(store.clone(), store.clone(), history.clone())
    }

    fn chunk(index: usize, content: &str) -> Chunk {
        Chunk {
            index,
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn metadata(job_id: JobId, total_chunks: usize) -> JobMetadata {
        JobMetadata {
            job_id,
            conversation_id: "u1".to_string(),
            total_chunks,
            message_id: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn enqueue_persists_the_user_message_and_the_record() {
        let store = Arc::new(MemoryStore::default());
        let history = Arc::new(MemoryHistoryStore::new());
        let service = service(&store, &history);

        let payload = JobPayload::Text {
            message: "hello".to_string(),
            sender_name: Some("Ana".to_string()),
        };
        let job_id = service.enqueue_job("u1", payload).await.expect("enqueue");

        let messages = history.messages("u1");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[0].sender_name.as_deref(), Some("Ana"));

        let batch = store.read_next("u1", 1).await.expect("read");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].1.job_id, job_id);
    }

    #[tokio::test]
    async fn unknown_jobs_read_as_queued() {
        let store = Arc::new(MemoryStore::default());
        let service = service(&store, &Arc::new(MemoryHistoryStore::new()));

        let snapshot = service.get_status(Uuid::new_v4()).await.expect("status");
        assert_eq!(snapshot.status, JobStatus::Queued);
        assert_eq!(snapshot.chunks, Vec::new());
        assert_eq!(snapshot.total_chunks, None);
        assert_eq!(snapshot.full_response, None);
    }

    #[tokio::test]
    async fn a_started_marker_alone_reads_as_in_progress() {
        let store = Arc::new(MemoryStore::default());
        let service = service(&store, &Arc::new(MemoryHistoryStore::new()));

        let job_id = Uuid::new_v4();
        store.mark_started(job_id).await.expect("mark");

        let snapshot = service.get_status(job_id).await.expect("status");
        assert_eq!(snapshot.status, JobStatus::InProgress);
        assert_eq!(snapshot.chunks, Vec::new());
    }

    #[tokio::test]
    async fn chunks_without_metadata_read_as_in_progress() {
        let store = Arc::new(MemoryStore::default());
        let service = service(&store, &Arc::new(MemoryHistoryStore::new()));

        let job_id = Uuid::new_v4();
        store.append_chunk(job_id, &chunk(0, "Hi")).await.expect("chunk");

        let snapshot = service.get_status(job_id).await.expect("status");
        assert_eq!(snapshot.status, JobStatus::InProgress);
        assert_eq!(snapshot.chunks.len(), 1);
        assert_eq!(snapshot.full_response, None);
    }

    #[tokio::test]
    async fn metadata_reads_as_complete_with_the_joined_response() {
        let store = Arc::new(MemoryStore::default());
        let service = service(&store, &Arc::new(MemoryHistoryStore::new()));

        let job_id = Uuid::new_v4();
        store.append_chunk(job_id, &chunk(0, "Hi")).await.expect("chunk");
        store.append_chunk(job_id, &chunk(1, " there")).await.expect("chunk");
        store.set_metadata(&metadata(job_id, 2)).await.expect("metadata");

        let snapshot = service.get_status(job_id).await.expect("status");
        assert_eq!(snapshot.status, JobStatus::Complete);
        assert_eq!(snapshot.total_chunks, Some(2));
        assert_eq!(snapshot.full_response.as_deref(), Some("Hi there"));
    }

    #[tokio::test]
    async fn complete_without_chunks_omits_the_full_response() {
        let store = Arc::new(MemoryStore::default());
        let service = service(&store, &Arc::new(MemoryHistoryStore::new()));

        let job_id = Uuid::new_v4();
        store.set_metadata(&metadata(job_id, 2)).await.expect("metadata");

        let snapshot = service.get_status(job_id).await.expect("status");
        assert_eq!(snapshot.status, JobStatus::Complete);
        assert_eq!(snapshot.total_chunks, Some(2));
        assert_eq!(snapshot.full_response, None);
    }

    #[tokio::test]
    async fn stream_replays_chunks_then_finishes_on_metadata() {
        let store = Arc::new(MemoryStore::default());
        let service = service(&store, &Arc::new(MemoryHistoryStore::new()));

        let job_id = Uuid::new_v4();
        store.append_chunk(job_id, &chunk(0, "Hi")).await.expect("chunk");
        store.append_chunk(job_id, &chunk(1, " there")).await.expect("chunk");
        store.set_metadata(&metadata(job_id, 2)).await.expect("metadata");

        let events: Vec<JobEvent> = service.stream_status(job_id, 0).collect().await;
        assert_eq!(
            events,
            vec![
                JobEvent::Chunk {
                    index: 0,
                    content: "Hi".to_string()
                },
                JobEvent::Chunk {
                    index: 1,
                    content: " there".to_string()
                },
                JobEvent::Done {
                    total_chunks: 2,
                    full_response: Some("Hi there".to_string())
                },
            ]
        );
    }

    #[tokio::test]
    async fn stream_resumes_from_the_requested_index() {
        let store = Arc::new(MemoryStore::default());
        let service = service(&store, &Arc::new(MemoryHistoryStore::new()));

        let job_id = Uuid::new_v4();
        store.append_chunk(job_id, &chunk(0, "Hi")).await.expect("chunk");
        store.append_chunk(job_id, &chunk(1, " there")).await.expect("chunk");
        store.set_metadata(&metadata(job_id, 2)).await.expect("metadata");

        let events: Vec<JobEvent> = service.stream_status(job_id, 1).collect().await;
        assert_eq!(
            events,
            vec![
                JobEvent::Chunk {
                    index: 1,
                    content: " there".to_string()
                },
                JobEvent::Done {
                    total_chunks: 2,
                    full_response: Some("Hi there".to_string())
                },
            ]
        );
    }

    #[tokio::test]
    async fn stream_picks_up_chunks_written_after_subscribing() {
        let store = Arc::new(MemoryStore::default());
        let service = service(&store, &Arc::new(MemoryHistoryStore::new()));

        let job_id = Uuid::new_v4();
        let mut stream = service.stream_status(job_id, 0);

        store.append_chunk(job_id, &chunk(0, "Hi")).await.expect("chunk");
        let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("first event in time")
            .expect("stream open");
        assert_eq!(
            first,
            JobEvent::Chunk {
                index: 0,
                content: "Hi".to_string()
            }
        );

        store.set_metadata(&metadata(job_id, 1)).await.expect("metadata");
        let second = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("second event in time")
            .expect("stream open");
        assert_eq!(
            second,
            JobEvent::Done {
                total_chunks: 1,
                full_response: Some("Hi".to_string())
            }
        );
        assert_eq!(stream.next().await, None);
    }
}
