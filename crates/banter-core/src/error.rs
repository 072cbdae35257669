//! Error types for the core pipeline.

use crate::agent::AgentError;
use crate::history::HistoryError;
use banter_store::StoreError;
use thiserror::Error;

/// Errors surfaced while enqueueing or processing jobs.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The conversation log or chunk relay failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The history store failed.
    #[error(transparent)]
    History(#[from] HistoryError),
    /// The chat agent failed to produce a response.
    #[error(transparent)]
    Agent(#[from] AgentError),
    /// The agent streaming phase exceeded the configured timeout.
    #[error("job timed out after {0}s")]
    Timeout(u64),
}
