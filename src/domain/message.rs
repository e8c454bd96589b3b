use chrono::{DateTime, Utc};

use super::identity::{ConversationId, MessageId, TempId, UserId};

/// Kind tag stored with every message row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageKind {
    #[default]
    Text,
    BookingRequest,
    /// Written by the hosted store itself; this client never sends one.
    #[cfg_attr(not(test), allow(dead_code))]
    System,
}

impl MessageKind {
    /// Returns a display label for non-text kinds, or None for plain text.
    pub fn display_label(&self) -> Option<&'static str> {
        match self {
            MessageKind::Text => None,
            MessageKind::BookingRequest => Some("[Booking request]"),
            MessageKind::System => Some("[System]"),
        }
    }
}

/// A message row as persisted by the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a new message row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub kind: MessageKind,
}

/// Identity of an entry in an open conversation's timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryId {
    /// Optimistic copy awaiting the write acknowledgement.
    Provisional(TempId),
    Persisted(MessageId),
}

/// A visible message in an open conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    pub id: EntryId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
}

impl TimelineEntry {
    pub fn provisional(temp_id: TempId, draft: &NewMessage, created_at: DateTime<Utc>) -> Self {
        Self {
            id: EntryId::Provisional(temp_id),
            conversation_id: draft.conversation_id,
            sender_id: draft.sender_id,
            content: draft.content.clone(),
            kind: draft.kind,
            created_at,
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self.id, EntryId::Provisional(_))
    }

    /// Returns the display content: kind label + text, or just text for plain messages.
    pub fn display_content(&self) -> String {
        match (self.kind.display_label(), self.content.is_empty()) {
            (Some(label), true) => label.to_owned(),
            (Some(label), false) => format!("{} {}", label, self.content),
            (None, _) => self.content.clone(),
        }
    }
}

impl From<Message> for TimelineEntry {
    fn from(message: Message) -> Self {
        Self {
            id: EntryId::Persisted(message.id),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            kind: message.kind,
            created_at: message.created_at,
        }
    }
}
