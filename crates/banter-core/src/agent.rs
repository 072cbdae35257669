//! Chat agent abstraction.
//!
//! The agent backend is injected wherever jobs are processed, so deployments
//! can plug in any model client that streams text fragments.

use crate::history::StoredMessage;
use async_trait::async_trait;
use banter_protocol::{ConversationId, JobPayload};
use futures_util::{Stream, stream};
use std::pin::Pin;
use thiserror::Error;

/// Error raised by a chat agent backend.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct AgentError(pub String);

impl AgentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Stream of response fragments produced by an agent.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, AgentError>> + Send>>;

/// Inputs handed to the agent for one job.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub conversation_id: ConversationId,
    /// Inbound message, prefixed with the sender's name in group chats.
    pub message: String,
    /// Recent conversation history, oldest first.
    pub history: Vec<StoredMessage>,
    pub payload: JobPayload,
}

/// A conversational agent that streams its response.
#[async_trait]
pub trait ChatAgent: Send + Sync {
    /// Produce a fragment stream answering `request`.
    async fn generate(&self, request: AgentRequest) -> Result<FragmentStream, AgentError>;
}

/// Development agent that answers by repeating the inbound message.
pub struct EchoAgent;

#[async_trait]
impl ChatAgent for EchoAgent {
    async fn generate(&self, request: AgentRequest) -> Result<FragmentStream, AgentError> {
        let fragments = vec![Ok("You said: ".to_string()), Ok(request.message)];
        Ok(Box::pin(stream::iter(fragments)))
    }
}
