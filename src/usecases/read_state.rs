use async_trait::async_trait;

use crate::domain::identity::{ConversationId, Identity};

const MARK_READ_FAILED: &str = "CHAT_MARK_READ_FAILED";
const UNREAD_COUNT_DEGRADED: &str = "CHAT_UNREAD_COUNT_DEGRADED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStateSourceError {
    Unauthorized,
    ConversationNotFound,
    Unavailable,
}

impl ReadStateSourceError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "READ_STATE_UNAUTHORIZED",
            Self::ConversationNotFound => "READ_STATE_CONVERSATION_NOT_FOUND",
            Self::Unavailable => "READ_STATE_UNAVAILABLE",
        }
    }
}

/// Read cursors and the server-computed unread count.
#[async_trait]
pub trait ReadStateStore: Send + Sync {
    /// Advances the caller's read cursor for the conversation to now. Never moves it back.
    async fn mark_conversation_as_read(
        &self,
        identity: &Identity,
        conversation_id: ConversationId,
    ) -> Result<(), ReadStateSourceError>;

    /// Messages from others newer than the caller's cursors, across all conversations.
    async fn get_unread_count(&self, identity: &Identity) -> Result<u32, ReadStateSourceError>;
}

/// Marks the conversation read; failures are logged and reported as `false`.
pub async fn mark_read(
    store: &dyn ReadStateStore,
    identity: &Identity,
    conversation_id: ConversationId,
) -> bool {
    match store
        .mark_conversation_as_read(identity, conversation_id)
        .await
    {
        Ok(()) => true,
        Err(error) => {
            tracing::warn!(
                code = MARK_READ_FAILED,
                reason = error.code(),
                conversation_id = %conversation_id,
                "failed to mark conversation as read"
            );
            false
        }
    }
}

/// Fetches the unread count, degrading to zero on error.
pub async fn fetch_unread_count(store: &dyn ReadStateStore, identity: &Identity) -> u32 {
    match store.get_unread_count(identity).await {
        Ok(count) => count,
        Err(error) => {
            tracing::warn!(
                code = UNREAD_COUNT_DEGRADED,
                reason = error.code(),
                "failed to fetch unread count; showing zero"
            );
            0
        }
    }
}
