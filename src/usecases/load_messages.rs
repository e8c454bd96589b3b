use async_trait::async_trait;

use crate::domain::{
    identity::{ConversationId, Identity},
    message::Message,
};

const HISTORY_LOAD_DEGRADED: &str = "CHAT_HISTORY_LOAD_DEGRADED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadMessagesQuery {
    pub conversation_id: ConversationId,
}

impl LoadMessagesQuery {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self { conversation_id }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadMessagesOutput {
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagesSourceError {
    Unauthorized,
    Unavailable,
    ConversationNotFound,
}

#[async_trait]
pub trait MessageHistorySource: Send + Sync {
    /// Returns every message of the conversation, oldest first.
    async fn list_messages(
        &self,
        identity: &Identity,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, MessagesSourceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadMessagesError {
    Unauthorized,
    TemporarilyUnavailable,
    ConversationNotFound,
}

impl LoadMessagesError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "HISTORY_UNAUTHORIZED",
            Self::TemporarilyUnavailable => "HISTORY_UNAVAILABLE",
            Self::ConversationNotFound => "HISTORY_CONVERSATION_NOT_FOUND",
        }
    }
}

pub async fn load_messages(
    source: &dyn MessageHistorySource,
    identity: &Identity,
    query: LoadMessagesQuery,
) -> Result<LoadMessagesOutput, LoadMessagesError> {
    let messages = source
        .list_messages(identity, query.conversation_id)
        .await
        .map_err(map_source_error)?;

    Ok(LoadMessagesOutput { messages })
}

/// Loads the history of a conversation, degrading to an empty list on any error.
pub async fn load_history_or_empty(
    source: &dyn MessageHistorySource,
    identity: &Identity,
    conversation_id: ConversationId,
) -> Vec<Message> {
    match load_messages(source, identity, LoadMessagesQuery::new(conversation_id)).await {
        Ok(output) => output.messages,
        Err(error) => {
            tracing::warn!(
                code = HISTORY_LOAD_DEGRADED,
                reason = error.code(),
                conversation_id = %conversation_id,
                "message history failed to load; showing empty conversation"
            );
            Vec::new()
        }
    }
}

fn map_source_error(error: MessagesSourceError) -> LoadMessagesError {
    match error {
        MessagesSourceError::Unauthorized => LoadMessagesError::Unauthorized,
        MessagesSourceError::Unavailable => LoadMessagesError::TemporarilyUnavailable,
        MessagesSourceError::ConversationNotFound => LoadMessagesError::ConversationNotFound,
    }
}
