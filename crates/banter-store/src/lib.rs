//! Conversation log and job relay storage for banter.
//!
//! The log carries pending job records per conversation with deliver-once,
//! acknowledge-explicitly semantics; the relay carries ephemeral chunk and
//! completion state per job. Both are trait seams so backends can be swapped
//! without touching the queue core.

mod error;
mod jsonl;
mod memory;
mod relay;
mod stream;

pub use error::StoreError;
pub use jsonl::JsonlConversationLog;
pub use memory::{DEFAULT_CHUNK_TTL, MemoryStore};
pub use relay::JobRelay;
pub use stream::ConversationLog;
