//! Core pipeline primitives for Banter.
//!
//! This crate owns the conversation-ordered job queue, the per-job
//! processing pipeline, history storage, and the chat service used by the
//! server binary.

pub mod agent;
pub mod error;
pub mod history;
pub mod queue;
pub mod service;

pub use agent::{AgentError, AgentRequest, ChatAgent, EchoAgent, FragmentStream};
pub use error::CoreError;
pub use history::{
    HistoryError, HistoryStore, JsonlHistoryStore, MemoryHistoryStore, StoredMessage,
};
pub use queue::{Dispatcher, DispatcherHandle};
pub use service::{ChatService, JobStream};
