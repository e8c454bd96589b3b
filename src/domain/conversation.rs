use super::identity::{ConversationId, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub id: UserId,
    pub username: Option<String>,
    pub avatar_type: Option<String>,
}

impl Profile {
    /// Returns the username, or a short form of the user id when none is set.
    pub fn display_name(&self) -> String {
        match self.username.as_deref() {
            Some(name) if !name.trim().is_empty() => name.to_owned(),
            _ => {
                let id = self.id.to_string();
                format!("user-{}", &id[..8])
            }
        }
    }
}

/// A conversation the current user participates in, with the other side's profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    /// Missing when the other participant's profile row is not readable.
    pub other_user: Option<Profile>,
}

/// Unordered pair of conversation participants.
///
/// `ParticipantPair::new(a, b) == ParticipantPair::new(b, a)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParticipantPair {
    low: UserId,
    high: UserId,
}

impl ParticipantPair {
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.low == user_id || self.high == user_id
    }

    /// Returns the participant that is not `user_id`, if `user_id` belongs to the pair.
    pub fn other(&self, user_id: UserId) -> Option<UserId> {
        if self.low == user_id {
            Some(self.high)
        } else if self.high == user_id {
            Some(self.low)
        } else {
            None
        }
    }
}
