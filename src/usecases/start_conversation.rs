use crate::domain::identity::{AuthContext, ConversationId, UserId};

use super::contracts::{ConversationDirectory, DirectorySourceError};

const START_CONVERSATION_FAILED: &str = "CHAT_START_CONVERSATION_FAILED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartConversationError {
    /// Caller should show the sign-in prompt.
    NotSignedIn,
    SelfConversation,
    UserNotFound,
    Failed,
}

impl std::fmt::Display for StartConversationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotSignedIn => f.write_str("Please sign in to message"),
            Self::SelfConversation => f.write_str("You cannot message yourself"),
            Self::UserNotFound => f.write_str("That user no longer exists"),
            Self::Failed => f.write_str("Could not start conversation"),
        }
    }
}

impl std::error::Error for StartConversationError {}

/// Returns the conversation between the signed-in user and `target`, creating it if needed.
///
/// The get-or-create runs as one server-side procedure, so concurrent callers on
/// either side of the pair converge on the same id.
pub async fn start_conversation(
    directory: &dyn ConversationDirectory,
    auth: &AuthContext,
    target: UserId,
) -> Result<ConversationId, StartConversationError> {
    let identity = auth.identity().ok_or(StartConversationError::NotSignedIn)?;

    if identity.user_id() == target {
        return Err(StartConversationError::SelfConversation);
    }

    directory
        .create_new_conversation(&identity, target)
        .await
        .map_err(|error| {
            tracing::warn!(
                code = START_CONVERSATION_FAILED,
                error = ?error,
                target = %target,
                "get-or-create conversation failed"
            );
            map_source_error(error)
        })
}

fn map_source_error(error: DirectorySourceError) -> StartConversationError {
    match error {
        DirectorySourceError::NotFound => StartConversationError::UserNotFound,
        DirectorySourceError::Forbidden | DirectorySourceError::Unavailable => {
            StartConversationError::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::domain::{
        conversation::{ConversationSummary, Profile},
        identity::Identity,
    };

    struct StubDirectory {
        result: Result<ConversationId, DirectorySourceError>,
        calls: Mutex<Vec<(UserId, UserId)>>,
    }

    impl StubDirectory {
        fn with_result(result: Result<ConversationId, DirectorySourceError>) -> Self {
            Self {
                result,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().expect("calls lock").len()
        }
    }

    #[async_trait]
    impl ConversationDirectory for StubDirectory {
        async fn create_new_conversation(
            &self,
            identity: &Identity,
            other_user_id: UserId,
        ) -> Result<ConversationId, DirectorySourceError> {
            self.calls
                .lock()
                .expect("calls lock")
                .push((identity.user_id(), other_user_id));
            self.result.clone()
        }

        async fn list_conversations(
            &self,
            _identity: &Identity,
        ) -> Result<Vec<ConversationSummary>, DirectorySourceError> {
            Ok(Vec::new())
        }

        async fn fetch_profile(&self, _user_id: UserId) -> Result<Profile, DirectorySourceError> {
            Err(DirectorySourceError::NotFound)
        }
    }

    #[tokio::test]
    async fn requires_signed_in_user() {
        let directory = StubDirectory::with_result(Ok(ConversationId::new()));

        let result = start_conversation(&directory, &AuthContext::SignedOut, UserId::new()).await;

        assert_eq!(result, Err(StartConversationError::NotSignedIn));
        assert_eq!(directory.call_count(), 0);
    }

    #[tokio::test]
    async fn refuses_conversation_with_self_without_remote_call() {
        let directory = StubDirectory::with_result(Ok(ConversationId::new()));
        let me = UserId::new();

        let result = start_conversation(&directory, &AuthContext::signed_in(me), me).await;

        assert_eq!(result, Err(StartConversationError::SelfConversation));
        assert_eq!(directory.call_count(), 0);
    }

    #[tokio::test]
    async fn returns_id_from_single_procedure_call() {
        let conversation_id = ConversationId::new();
        let directory = StubDirectory::with_result(Ok(conversation_id));
        let me = UserId::new();
        let target = UserId::new();

        let result = start_conversation(&directory, &AuthContext::signed_in(me), target).await;

        assert_eq!(result, Ok(conversation_id));
        assert_eq!(*directory.calls.lock().expect("calls lock"), [(me, target)]);
    }

    #[tokio::test]
    async fn maps_remote_failure_to_user_visible_error() {
        let directory = StubDirectory::with_result(Err(DirectorySourceError::Unavailable));

        let error = start_conversation(
            &directory,
            &AuthContext::signed_in(UserId::new()),
            UserId::new(),
        )
        .await
        .expect_err("must fail");

        assert_eq!(error, StartConversationError::Failed);
        assert_eq!(error.to_string(), "Could not start conversation");
    }

    #[tokio::test]
    async fn maps_missing_target_to_user_not_found() {
        let directory = StubDirectory::with_result(Err(DirectorySourceError::NotFound));

        let error = start_conversation(
            &directory,
            &AuthContext::signed_in(UserId::new()),
            UserId::new(),
        )
        .await
        .expect_err("must fail");

        assert_eq!(error, StartConversationError::UserNotFound);
    }
}
