//! Use case for sending a message to a conversation.
//!
//! `prepare_send` validates a command against the auth context and builds the
//! insert payload; `send_message` is the non-optimistic path that writes it
//! directly. The optimistic path lives in `conversation_session`.

use async_trait::async_trait;

use crate::domain::{
    identity::{AuthContext, ConversationId, Identity},
    message::{Message, MessageKind, NewMessage},
};

/// Command to send a message to a specific conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessageCommand {
    pub conversation_id: ConversationId,
    pub content: String,
    pub kind: MessageKind,
}

impl SendMessageCommand {
    pub fn text(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            content: content.into(),
            kind: MessageKind::Text,
        }
    }
}

/// Errors that can occur at the source level (hosted store).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendMessageSourceError {
    Unauthorized,
    /// Row-level security rejected the insert.
    Forbidden,
    ConversationNotFound,
    Unavailable,
}

/// Use-case level errors for the send operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendMessageError {
    /// Message text is empty after trimming whitespace.
    EmptyMessage,
    /// No authenticated sender.
    NotSignedIn,
    /// The conversation view was closed before the send started.
    SessionClosed,
    Unauthorized,
    ConversationNotFound,
    TemporarilyUnavailable,
}

impl SendMessageError {
    /// Rejections that happen before anything is written or shown.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::EmptyMessage | Self::NotSignedIn | Self::SessionClosed
        )
    }
}

impl std::fmt::Display for SendMessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => f.write_str("message is empty"),
            Self::NotSignedIn => f.write_str("sign in to send messages"),
            Self::SessionClosed => f.write_str("conversation is closed"),
            Self::Unauthorized => f.write_str("not allowed to post in this conversation"),
            Self::ConversationNotFound => f.write_str("conversation not found"),
            Self::TemporarilyUnavailable => f.write_str("service temporarily unavailable"),
        }
    }
}

impl std::error::Error for SendMessageError {}

#[async_trait]
pub trait MessageWriter: Send + Sync {
    /// Inserts the row and returns it as persisted (server id and timestamp).
    async fn insert_message(
        &self,
        identity: &Identity,
        message: NewMessage,
    ) -> Result<Message, SendMessageSourceError>;
}

/// Validates `command` and builds the insert payload with the signed-in user as sender.
pub fn prepare_send(
    auth: &AuthContext,
    command: SendMessageCommand,
) -> Result<(Identity, NewMessage), SendMessageError> {
    let content = command.content.trim();
    if content.is_empty() {
        return Err(SendMessageError::EmptyMessage);
    }

    let identity = auth.identity().ok_or(SendMessageError::NotSignedIn)?;

    Ok((
        identity,
        NewMessage {
            conversation_id: command.conversation_id,
            sender_id: identity.user_id(),
            content: content.to_owned(),
            kind: command.kind,
        },
    ))
}

/// Sends a message without optimistic display.
pub async fn send_message(
    writer: &dyn MessageWriter,
    auth: &AuthContext,
    command: SendMessageCommand,
) -> Result<Message, SendMessageError> {
    let (identity, draft) = prepare_send(auth, command)?;

    writer
        .insert_message(&identity, draft)
        .await
        .map_err(map_source_error)
}

pub(crate) fn map_source_error(error: SendMessageSourceError) -> SendMessageError {
    match error {
        SendMessageSourceError::Unauthorized | SendMessageSourceError::Forbidden => {
            SendMessageError::Unauthorized
        }
        SendMessageSourceError::ConversationNotFound => SendMessageError::ConversationNotFound,
        SendMessageSourceError::Unavailable => SendMessageError::TemporarilyUnavailable,
    }
}
