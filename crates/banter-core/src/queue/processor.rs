//! Per-job processing pipeline.

use crate::agent::{AgentError, AgentRequest, ChatAgent};
use crate::error::CoreError;
use crate::history::HistoryStore;
use banter_protocol::{Chunk, JobMetadata, JobRecord, MessageId, Role};
use banter_store::JobRelay;
use chrono::Utc;
use futures_util::StreamExt;
use log::{error, warn};
use std::sync::Arc;
use std::time::Duration;

/// WhatsApp group conversation ids end with this suffix.
const GROUP_SUFFIX: &str = "@g.us";

/// Runs one job end to end: history recall, agent streaming, chunk
/// publication, and final persistence.
pub(crate) struct JobProcessor {
    relay: Arc<dyn JobRelay>,
    history: Arc<dyn HistoryStore>,
    agent: Arc<dyn ChatAgent>,
    job_timeout: Duration,
    private_limit: usize,
    group_limit: usize,
}

impl JobProcessor {
    pub(crate) fn new(
        relay: Arc<dyn JobRelay>,
        history: Arc<dyn HistoryStore>,
        agent: Arc<dyn ChatAgent>,
        job_timeout: Duration,
        private_limit: usize,
        group_limit: usize,
    ) -> Self {
        Self {
            relay,
            history,
            agent,
            job_timeout,
            private_limit,
            group_limit,
        }
    }

    /// Process one job record.
    ///
    /// Fragments streamed before a mid-job failure are not lost: the
    /// assembled prefix is persisted to history with an error marker before
    /// the failure propagates.
    pub(crate) async fn process(&self, record: &JobRecord) -> Result<MessageId, CoreError> {
        if let Err(err) = self.relay.mark_started(record.job_id).await {
            warn!("failed to mark job started (job_id={}): {err}", record.job_id);
        }

        let mut assembled = String::new();
        let mut emitted = 0usize;
        match self.run(record, &mut assembled, &mut emitted).await {
            Ok(message_id) => Ok(message_id),
            Err(err) => {
                if emitted > 0 {
                    let partial = format!("[Partial - Error] {assembled}");
                    if let Err(history_err) = self
                        .history
                        .append(&record.conversation_id, Role::Assistant, &partial, None)
                        .await
                    {
                        error!(
                            "failed to persist partial response (job_id={}): {history_err}",
                            record.job_id
                        );
                    }
                }
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        record: &JobRecord,
        assembled: &mut String,
        emitted: &mut usize,
    ) -> Result<MessageId, CoreError> {
        let is_group = record.conversation_id.ends_with(GROUP_SUFFIX);
        let limit = if is_group {
            self.group_limit
        } else {
            self.private_limit
        };
        let history = self.history.recent(&record.conversation_id, limit).await?;

        let message = match (is_group, record.payload.sender_name()) {
            (true, Some(sender)) => format!("{sender}: {}", record.payload.message()),
            _ => record.payload.message().to_string(),
        };
        let request = AgentRequest {
            conversation_id: record.conversation_id.clone(),
            message,
            history,
            payload: record.payload.clone(),
        };

        // Chunk publication is best effort: a relay failure downgrades the
        // live view but never the final response.
        let consume = async {
            let mut stream = self.agent.generate(request).await?;
            while let Some(fragment) = stream.next().await {
                let fragment = fragment?;
                if fragment.is_empty() {
                    continue;
                }
                let chunk = Chunk {
                    index: *emitted,
                    content: fragment.clone(),
                    timestamp: Utc::now(),
                };
                if let Err(err) = self.relay.append_chunk(record.job_id, &chunk).await {
                    warn!(
                        "failed to publish chunk (job_id={}, index={}): {err}",
                        record.job_id, chunk.index
                    );
                }
                assembled.push_str(&fragment);
                *emitted += 1;
            }
            Ok::<(), AgentError>(())
        };
        match tokio::time::timeout(self.job_timeout, consume).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(CoreError::Agent(err)),
            Err(_) => return Err(CoreError::Timeout(self.job_timeout.as_secs())),
        }

        let message_id = self
            .history
            .append(&record.conversation_id, Role::Assistant, assembled, None)
            .await?;

        let metadata = JobMetadata {
            job_id: record.job_id,
            conversation_id: record.conversation_id.clone(),
            total_chunks: *emitted,
            message_id,
            created_at: Utc::now(),
        };
        if let Err(err) = self.relay.set_metadata(&metadata).await {
            error!(
                "failed to store completion metadata (job_id={}): {err}",
                record.job_id
            );
        }

        Ok(message_id)
    }
}
