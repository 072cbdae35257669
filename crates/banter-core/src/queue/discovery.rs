//! Backlog discovery over the conversation log.

use banter_protocol::ConversationId;
use banter_store::{ConversationLog, StoreError};
use log::warn;

/// Return ids of conversations with at least one pending entry.
///
/// A failure while sizing one conversation only skips that conversation;
/// listing failures fail the whole pass.
pub(crate) async fn discover_backlog(
    log: &dyn ConversationLog,
) -> Result<Vec<ConversationId>, StoreError> {
    let mut candidates = Vec::new();
    for conversation_id in log.conversations().await? {
        match log.pending_and_backlog_size(&conversation_id).await {
            Ok(0) => {}
            Ok(_) => candidates.push(conversation_id),
            Err(err) => {
                warn!("failed to size backlog (conversation_id={conversation_id}): {err}");
            }
        }
    }
    Ok(candidates)
}
