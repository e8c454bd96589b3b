use std::fmt;

use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

uuid_id!(
    /// Identity of a registered user (profile row id).
    UserId
);
uuid_id!(ConversationId);
uuid_id!(
    /// Server-assigned identity of a persisted message.
    MessageId
);
uuid_id!(
    /// Client-side identity of an optimistic message that has not been acknowledged yet.
    TempId
);

/// The signed-in user, established at session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    user_id: UserId,
}

impl Identity {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

/// Explicit auth lifecycle: established at sign-in, cleared at sign-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthContext {
    #[default]
    SignedOut,
    SignedIn(Identity),
}

impl AuthContext {
    pub fn signed_in(user_id: UserId) -> Self {
        Self::SignedIn(Identity::new(user_id))
    }

    pub fn identity(&self) -> Option<Identity> {
        match self {
            Self::SignedIn(identity) => Some(*identity),
            Self::SignedOut => None,
        }
    }
}
