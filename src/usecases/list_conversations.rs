use crate::domain::{
    conversation::{ConversationSummary, Profile},
    identity::{AuthContext, UserId},
};

use super::contracts::{ConversationDirectory, DirectorySourceError};

const CONVERSATIONS_LOAD_DEGRADED: &str = "CHAT_CONVERSATIONS_LOAD_DEGRADED";
const PROFILE_LOAD_DEGRADED: &str = "CHAT_PROFILE_LOAD_DEGRADED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListConversationsOutput {
    pub conversations: Vec<ConversationSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListConversationsError {
    NotSignedIn,
    Unauthorized,
    TemporarilyUnavailable,
}

pub async fn list_conversations(
    directory: &dyn ConversationDirectory,
    auth: &AuthContext,
) -> Result<ListConversationsOutput, ListConversationsError> {
    let identity = auth.identity().ok_or(ListConversationsError::NotSignedIn)?;
    let conversations = directory
        .list_conversations(&identity)
        .await
        .map_err(map_source_error)?;

    Ok(ListConversationsOutput { conversations })
}

/// Lists conversations for the signed-in user; errors and a missing user yield an empty list.
pub async fn list_conversations_or_empty(
    directory: &dyn ConversationDirectory,
    auth: &AuthContext,
) -> Vec<ConversationSummary> {
    match list_conversations(directory, auth).await {
        Ok(output) => output.conversations,
        Err(ListConversationsError::NotSignedIn) => Vec::new(),
        Err(error) => {
            tracing::warn!(
                code = CONVERSATIONS_LOAD_DEGRADED,
                error = ?error,
                "conversation list failed to load; showing none"
            );
            Vec::new()
        }
    }
}

/// Fetches a profile, degrading to None on error.
pub async fn load_profile(directory: &dyn ConversationDirectory, user_id: UserId) -> Option<Profile> {
    match directory.fetch_profile(user_id).await {
        Ok(profile) => Some(profile),
        Err(error) => {
            tracing::warn!(
                code = PROFILE_LOAD_DEGRADED,
                error = ?error,
                user_id = %user_id,
                "profile failed to load"
            );
            None
        }
    }
}

fn map_source_error(error: DirectorySourceError) -> ListConversationsError {
    match error {
        DirectorySourceError::Forbidden => ListConversationsError::Unauthorized,
        DirectorySourceError::NotFound | DirectorySourceError::Unavailable => {
            ListConversationsError::TemporarilyUnavailable
        }
    }
}
