use super::{
    identity::{ConversationId, TempId},
    message::Message,
};

/// What a realtime subscription listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionScope {
    /// Inserts into one conversation.
    Conversation(ConversationId),
    /// Inserts into any conversation.
    Global,
}

impl SubscriptionScope {
    pub fn matches(&self, message: &Message) -> bool {
        match self {
            Self::Conversation(id) => message.conversation_id == *id,
            Self::Global => true,
        }
    }

    /// Channel topic name, mirroring the hosted channel naming.
    pub fn topic(&self) -> String {
        match self {
            Self::Conversation(id) => format!("conversation:{id}"),
            Self::Global => "global_messages".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeEvent {
    MessageInserted(Message),
}

/// The view the user currently looks at; changing it triggers an unread recount.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Route(String);

impl Route {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A user-facing notice raised by a failed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserNotice {
    SendFailed { temp_id: TempId },
}

impl UserNotice {
    pub fn text(&self) -> &'static str {
        match self {
            Self::SendFailed { .. } => "Failed to send message",
        }
    }
}
