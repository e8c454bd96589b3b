use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{
    conversation::{ConversationSummary, Profile},
    events::{RealtimeEvent, SubscriptionScope},
    identity::{ConversationId, Identity, UserId},
};

use super::{
    load_messages::MessageHistorySource, read_state::ReadStateStore, send_message::MessageWriter,
};

const SUBSCRIPTION_CANCELLED: &str = "REALTIME_SUBSCRIPTION_CANCELLED";

/// Errors reported by conversation/profile directory calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectorySourceError {
    /// Rejected by row-level security or procedure checks.
    Forbidden,
    NotFound,
    Unavailable,
}

#[async_trait]
pub trait ConversationDirectory: Send + Sync {
    /// Server-side get-or-create for the conversation between `identity` and `other_user_id`.
    async fn create_new_conversation(
        &self,
        identity: &Identity,
        other_user_id: UserId,
    ) -> Result<ConversationId, DirectorySourceError>;

    async fn list_conversations(
        &self,
        identity: &Identity,
    ) -> Result<Vec<ConversationSummary>, DirectorySourceError>;

    async fn fetch_profile(&self, user_id: UserId) -> Result<Profile, DirectorySourceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeError {
    Unavailable,
}

impl std::fmt::Display for SubscribeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => f.write_str("realtime channel unavailable"),
        }
    }
}

impl std::error::Error for SubscribeError {}

pub trait RealtimeFeed: Send + Sync {
    fn subscribe(&self, scope: SubscriptionScope) -> Result<Subscription, SubscribeError>;
}

/// Everything the sync engine needs from the hosted backend.
pub trait ChatBackend:
    MessageHistorySource + MessageWriter + ReadStateStore + ConversationDirectory + RealtimeFeed
{
}

impl<T> ChatBackend for T where
    T: MessageHistorySource + MessageWriter + ReadStateStore + ConversationDirectory + RealtimeFeed
{
}

type CancelFn = Box<dyn FnOnce() + Send + 'static>;

/// A live realtime subscription: an event stream plus its cancel handle.
///
/// The cancel handle runs exactly once, on `unsubscribe` or on drop.
pub struct Subscription {
    scope: SubscriptionScope,
    events: mpsc::UnboundedReceiver<RealtimeEvent>,
    cancel: Option<CancelFn>,
}

impl Subscription {
    pub fn new<F>(
        scope: SubscriptionScope,
        events: mpsc::UnboundedReceiver<RealtimeEvent>,
        cancel: F,
    ) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            scope,
            events,
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn scope(&self) -> SubscriptionScope {
        self.scope
    }

    /// Waits for the next event. Returns None once the channel is closed.
    pub async fn next_event(&mut self) -> Option<RealtimeEvent> {
        self.events.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.cancel_once();
    }

    fn cancel_once(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
            self.events.close();
            tracing::debug!(
                code = SUBSCRIPTION_CANCELLED,
                topic = %self.scope.topic(),
                "realtime subscription cancelled"
            );
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_once();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("scope", &self.scope)
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
