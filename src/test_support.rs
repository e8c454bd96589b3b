use std::{sync::Arc, time::Duration};

use crate::{
    backend::InMemoryBackend,
    domain::{
        identity::{AuthContext, ConversationId, Identity, UserId},
        message::{Message, MessageKind, NewMessage, TimelineEntry},
    },
    usecases::{
        contracts::{ChatBackend, ConversationDirectory},
        conversation_session::ConversationSession,
        send_message::MessageWriter,
    },
};

const WAIT_LIMIT: Duration = Duration::from_secs(2);

/// Two neighbours, alice and bob, with one conversation between them.
pub struct Village {
    pub backend: Arc<InMemoryBackend>,
    pub alice: AuthContext,
    pub bob: AuthContext,
    pub alice_id: UserId,
    pub bob_id: UserId,
    pub conversation_id: ConversationId,
}

impl Village {
    pub async fn new() -> Self {
        let backend = Arc::new(InMemoryBackend::default());
        let alice_id = backend.register_user("alice");
        let bob_id = backend.register_user("bob");
        let conversation_id = backend
            .create_new_conversation(&Identity::new(alice_id), bob_id)
            .await
            .expect("conversation should be created");

        Self {
            backend,
            alice: AuthContext::signed_in(alice_id),
            bob: AuthContext::signed_in(bob_id),
            alice_id,
            bob_id,
            conversation_id,
        }
    }

    pub fn alice_identity(&self) -> Identity {
        Identity::new(self.alice_id)
    }

    pub fn bob_identity(&self) -> Identity {
        Identity::new(self.bob_id)
    }

    /// Writes straight to the store as bob, bypassing any session.
    pub async fn post_as_bob(&self, content: &str) -> Message {
        self.backend
            .insert_message(
                &self.bob_identity(),
                NewMessage {
                    conversation_id: self.conversation_id,
                    sender_id: self.bob_id,
                    content: content.to_owned(),
                    kind: MessageKind::Text,
                },
            )
            .await
            .expect("bob should be able to post")
    }
}

/// Waits until the session timeline satisfies `predicate`, failing the test after a bound.
pub async fn wait_until<B: ChatBackend + 'static>(
    session: &ConversationSession<B>,
    predicate: impl Fn(&[TimelineEntry]) -> bool,
) {
    let mut updates = session.updates();
    let reached = tokio::time::timeout(WAIT_LIMIT, async {
        loop {
            if predicate(&session.entries()) {
                return;
            }
            if updates.changed().await.is_err() {
                return;
            }
        }
    })
    .await;

    assert!(
        reached.is_ok() && predicate(&session.entries()),
        "timeline never reached expected state: {:?}",
        session.entries()
    );
}
