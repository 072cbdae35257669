//! Conversation-ordered job queue.
//!
//! Jobs for one conversation run strictly in enqueue order; different
//! conversations drain in parallel. The dispatcher periodically discovers
//! conversations with pending entries and spawns one drain task per
//! conversation, skipping any that already have a drain in flight.

mod discovery;
mod processor;

use crate::agent::ChatAgent;
use crate::history::HistoryStore;
use banter_config::BanterConfig;
use banter_protocol::ConversationId;
use banter_store::{ConversationLog, JobRelay};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use processor::JobProcessor;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

/// Spawns and supervises per-conversation drain tasks.
pub struct Dispatcher {
    log: Arc<dyn ConversationLog>,
    processor: Arc<JobProcessor>,
    in_flight: Arc<Mutex<HashSet<ConversationId>>>,
    discovery_interval: Duration,
    error_backoff: Duration,
    read_batch_size: usize,
    stop_when_idle: bool,
}

impl Dispatcher {
    pub fn new(
        log: Arc<dyn ConversationLog>,
        relay: Arc<dyn JobRelay>,
        history: Arc<dyn HistoryStore>,
        agent: Arc<dyn ChatAgent>,
        config: &BanterConfig,
    ) -> Self {
        let processor = JobProcessor::new(
            relay,
            history,
            agent,
            config.queue.job_timeout(),
            config.history.private_limit,
            config.history.group_limit,
        );
        Self {
            log,
            processor: Arc::new(processor),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            discovery_interval: config.queue.discovery_interval(),
            error_backoff: config.queue.error_backoff(),
            read_batch_size: config.queue.read_batch_size,
            stop_when_idle: false,
        }
    }

    /// Stop the dispatcher on the first discovery pass that finds no pending
    /// work and no drain in flight. Intended for tests and batch drains.
    pub fn stop_when_idle(mut self) -> Self {
        self.stop_when_idle = true;
        self
    }

    /// Start the dispatch loop on the current runtime.
    pub fn start(self) -> DispatcherHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(shutdown_rx));
        DispatcherHandle {
            shutdown: shutdown_tx,
            handle,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "dispatcher started (interval={}ms, batch={})",
            self.discovery_interval.as_millis(),
            self.read_batch_size
        );
        let mut drains = JoinSet::new();
        loop {
            while drains.try_join_next().is_some() {}

            match discovery::discover_backlog(self.log.as_ref()).await {
                Ok(candidates) => {
                    if self.stop_when_idle
                        && candidates.is_empty()
                        && self.in_flight.lock().is_empty()
                    {
                        debug!("queue drained, dispatcher stopping");
                        break;
                    }
                    for conversation_id in candidates {
                        self.spawn_drain(&mut drains, conversation_id, shutdown.clone());
                    }
                }
                Err(err) => {
                    error!("backlog discovery failed: {err}");
                    tokio::select! {
                        _ = tokio::time::sleep(self.error_backoff) => {}
                        _ = shutdown.changed() => break,
                    }
                    continue;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.discovery_interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        // In-progress drains stop claiming new entries once shutdown is
        // signalled; wait for their current jobs to finish.
        while drains.join_next().await.is_some() {}
        info!("dispatcher stopped");
    }

    fn spawn_drain(
        &self,
        drains: &mut JoinSet<()>,
        conversation_id: ConversationId,
        shutdown: watch::Receiver<bool>,
    ) {
        if !self.in_flight.lock().insert(conversation_id.clone()) {
            return;
        }
        debug!("draining conversation (conversation_id={conversation_id})");
        let log = Arc::clone(&self.log);
        let processor = Arc::clone(&self.processor);
        let in_flight = Arc::clone(&self.in_flight);
        let batch_size = self.read_batch_size;
        drains.spawn(async move {
            let _guard = InFlightGuard {
                conversations: in_flight,
                conversation_id: conversation_id.clone(),
            };
            drain_conversation(
                log.as_ref(),
                processor.as_ref(),
                &conversation_id,
                batch_size,
                shutdown,
            )
            .await;
        });
    }
}

/// Handle to a running dispatcher.
pub struct DispatcherHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Signal shutdown and wait for in-progress jobs to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.handle.await {
            warn!("dispatcher task panicked: {err}");
        }
    }

    /// Wait for the dispatcher to stop on its own.
    ///
    /// Only returns for dispatchers configured with
    /// [`Dispatcher::stop_when_idle`].
    pub async fn wait(self) {
        if let Err(err) = self.handle.await {
            warn!("dispatcher task panicked: {err}");
        }
    }
}

/// Removes the conversation from the in-flight set when the drain ends,
/// panics included.
struct InFlightGuard {
    conversations: Arc<Mutex<HashSet<ConversationId>>>,
    conversation_id: ConversationId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.conversations.lock().remove(&self.conversation_id);
    }
}

/// Drain one conversation's pending entries in order.
///
/// A processing failure is logged and the entry acknowledged anyway, so one
/// bad job cannot wedge its conversation. An acknowledgment failure stops
/// the drain instead: reading past an unacknowledged entry would break
/// per-conversation ordering, so the entry is left for redelivery.
async fn drain_conversation(
    log: &dyn ConversationLog,
    processor: &JobProcessor,
    conversation_id: &str,
    batch_size: usize,
    shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        let batch = match log.read_next(conversation_id, batch_size).await {
            Ok(batch) => batch,
            Err(err) => {
                error!("failed to read pending entries (conversation_id={conversation_id}): {err}");
                return;
            }
        };
        if batch.is_empty() {
            return;
        }
        for (entry_id, record) in batch {
            match processor.process(&record).await {
                Ok(message_id) => {
                    info!(
                        "job complete (job_id={}, conversation_id={conversation_id}, message_id={message_id})",
                        record.job_id
                    );
                }
                Err(err) => {
                    error!(
                        "job failed (job_id={}, conversation_id={conversation_id}): {err}",
                        record.job_id
                    );
                }
            }
            if let Err(err) = log.acknowledge(conversation_id, entry_id).await {
                error!(
                    "failed to acknowledge entry (conversation_id={conversation_id}, entry_id={entry_id}): {err}"
                );
                return;
            }
        }
    }
}
