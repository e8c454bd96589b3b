//! Conversation sync engine for one open conversation.
//!
//! A session owns the visible timeline of a conversation while it is open. It
//! loads history, shows sends optimistically and reconciles them with the store,
//! and merges realtime inserts without duplicating entries that an optimistic
//! send already confirmed (or vice versa).
//!
//! Sends are two-phase: `begin_send` appends the provisional entry synchronously
//! and returns a `PendingSend`; `PendingSend::complete` performs the write. Any
//! number of pending sends may be in flight, each keyed by its own temporary id.
//! Completions and realtime events that arrive after the session is closed or
//! dropped are ignored.

use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use tokio::{sync::watch, task::JoinHandle};

use crate::domain::{
    events::{RealtimeEvent, SubscriptionScope, UserNotice},
    identity::{AuthContext, ConversationId, Identity, TempId},
    message::{Message, MessageKind, NewMessage, TimelineEntry},
    timeline::{ConversationTimeline, MergeOutcome, TimelineUiState},
};

use super::{
    contracts::{ChatBackend, Subscription},
    load_messages::load_history_or_empty,
    read_state::mark_read,
    send_message::{map_source_error, prepare_send, SendMessageCommand, SendMessageError},
};

const SESSION_OPENED: &str = "CHAT_SESSION_OPENED";
const SESSION_CLOSED: &str = "CHAT_SESSION_CLOSED";
const SESSION_SUBSCRIBE_FAILED: &str = "CHAT_SESSION_SUBSCRIBE_FAILED";
const SEND_FAILED: &str = "CHAT_SEND_FAILED";
const SEND_COMPLETION_IGNORED: &str = "CHAT_SEND_COMPLETION_IGNORED";
const MERGE_LOOP_STOPPED: &str = "CHAT_MERGE_LOOP_STOPPED";
const MERGE_LOOP_CHANNEL_CLOSED: &str = "CHAT_MERGE_LOOP_CHANNEL_CLOSED";
const MERGE_LOOP_JOIN_FAILED: &str = "CHAT_MERGE_LOOP_JOIN_FAILED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenSessionError {
    NotSignedIn,
}

impl std::fmt::Display for OpenSessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotSignedIn => f.write_str("sign in to open conversations"),
        }
    }
}

impl std::error::Error for OpenSessionError {}

/// State shared between the session, its merge loop and its pending sends.
#[derive(Debug)]
struct SessionShared {
    state: Mutex<SessionState>,
    revision: watch::Sender<u64>,
}

#[derive(Debug, Default)]
struct SessionState {
    timeline: ConversationTimeline,
    notices: Vec<UserNotice>,
    closed: bool,
}

impl SessionShared {
    fn new(conversation_id: ConversationId) -> Self {
        let mut timeline = ConversationTimeline::default();
        timeline.set_loading(conversation_id);
        let (revision, _) = watch::channel(0);
        Self {
            state: Mutex::new(SessionState {
                timeline,
                notices: Vec::new(),
                closed: false,
            }),
            revision,
        }
    }

    /// Applies `mutate` unless the session is closed, then bumps the revision.
    fn update<T>(&self, mutate: impl FnOnce(&mut SessionState) -> T) -> Option<T> {
        let result = {
            let mut state = self.state.lock().ok()?;
            if state.closed {
                return None;
            }
            mutate(&mut state)
        };
        self.revision.send_modify(|revision| *revision += 1);
        Some(result)
    }

    fn read<T>(&self, read: impl FnOnce(&SessionState) -> T) -> Option<T> {
        self.state.lock().ok().map(|state| read(&state))
    }

    fn is_open(&self) -> bool {
        self.read(|state| !state.closed).unwrap_or(false)
    }

    fn merge(&self, message: Message) -> Option<MergeOutcome> {
        self.update(|state| state.timeline.merge_incoming(message))
    }
}

/// One open conversation view.
pub struct ConversationSession<B: ChatBackend> {
    backend: Arc<B>,
    identity: Identity,
    conversation_id: ConversationId,
    shared: Arc<SessionShared>,
    stop_tx: Option<watch::Sender<bool>>,
    merge_loop: Option<JoinHandle<()>>,
}

impl<B: ChatBackend + 'static> ConversationSession<B> {
    /// Opens a conversation: subscribes to its inserts, loads history and marks it read.
    ///
    /// Must be called within a tokio runtime. A failed subscription or history load
    /// does not fail the open; the session then shows what it has.
    pub async fn open(
        backend: Arc<B>,
        auth: &AuthContext,
        conversation_id: ConversationId,
    ) -> Result<Self, OpenSessionError> {
        let identity = auth.identity().ok_or(OpenSessionError::NotSignedIn)?;
        let shared = Arc::new(SessionShared::new(conversation_id));

        let (stop_tx, merge_loop) =
            match backend.subscribe(SubscriptionScope::Conversation(conversation_id)) {
                Ok(subscription) => {
                    let (stop_tx, stop_rx) = watch::channel(false);
                    let handle = tokio::spawn(run_merge_loop(
                        Arc::clone(&backend),
                        identity,
                        conversation_id,
                        Arc::downgrade(&shared),
                        subscription,
                        stop_rx,
                    ));
                    (Some(stop_tx), Some(handle))
                }
                Err(error) => {
                    tracing::warn!(
                        code = SESSION_SUBSCRIBE_FAILED,
                        error = %error,
                        conversation_id = %conversation_id,
                        "realtime subscription failed; conversation will not live-update"
                    );
                    (None, None)
                }
            };

        let history = load_history_or_empty(backend.as_ref(), &identity, conversation_id).await;
        shared.update(|state| state.timeline.set_ready(history));
        mark_read(backend.as_ref(), &identity, conversation_id).await;

        tracing::info!(
            code = SESSION_OPENED,
            conversation_id = %conversation_id,
            live = merge_loop.is_some(),
            "conversation session opened"
        );

        Ok(Self {
            backend,
            identity,
            conversation_id,
            shared,
            stop_tx,
            merge_loop,
        })
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Snapshot of the visible entries.
    pub fn entries(&self) -> Vec<TimelineEntry> {
        self.shared
            .read(|state| state.timeline.entries().to_vec())
            .unwrap_or_default()
    }

    pub fn ui_state(&self) -> TimelineUiState {
        self.shared
            .read(|state| state.timeline.ui_state())
            .unwrap_or(TimelineUiState::Empty)
    }

    pub fn pending_count(&self) -> usize {
        self.shared
            .read(|state| state.timeline.pending_count())
            .unwrap_or_default()
    }

    /// Takes the user-visible notices raised since the last call.
    pub fn drain_notices(&self) -> Vec<UserNotice> {
        self.shared
            .state
            .lock()
            .map(|mut state| std::mem::take(&mut state.notices))
            .unwrap_or_default()
    }

    /// Receiver that changes whenever the timeline or notices change.
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    /// Appends a provisional plain-text entry and returns the write still to be issued.
    pub fn begin_send(
        &self,
        auth: &AuthContext,
        content: &str,
    ) -> Result<PendingSend<B>, SendMessageError> {
        self.begin_send_kind(auth, content, MessageKind::Text)
    }

    pub fn begin_send_kind(
        &self,
        auth: &AuthContext,
        content: &str,
        kind: MessageKind,
    ) -> Result<PendingSend<B>, SendMessageError> {
        let (identity, draft) = prepare_send(
            auth,
            SendMessageCommand {
                conversation_id: self.conversation_id,
                content: content.to_owned(),
                kind,
            },
        )?;

        let temp_id = TempId::new();
        let provisional = TimelineEntry::provisional(temp_id, &draft, Utc::now());
        self.shared
            .update(|state| state.timeline.push_provisional(provisional))
            .ok_or(SendMessageError::SessionClosed)?;

        Ok(PendingSend {
            backend: Arc::clone(&self.backend),
            identity,
            draft,
            temp_id,
            shared: Arc::downgrade(&self.shared),
        })
    }

    /// Optimistically sends a plain-text message and waits for the write.
    pub async fn send(
        &self,
        auth: &AuthContext,
        content: &str,
    ) -> Result<Message, SendMessageError> {
        self.begin_send(auth, content)?.complete().await
    }

    /// Closes the view: stops the merge loop, releases the subscription and
    /// ignores any completion still in flight.
    pub async fn close(mut self) {
        self.shutdown();
        if let Some(handle) = self.merge_loop.take() {
            if let Err(error) = handle.await {
                tracing::warn!(
                    code = MERGE_LOOP_JOIN_FAILED,
                    error = %error,
                    "merge loop did not shut down cleanly"
                );
            }
        }
    }

    fn shutdown(&mut self) {
        if let Ok(mut state) = self.shared.state.lock() {
            if state.closed {
                return;
            }
            state.closed = true;
            state.timeline.clear();
        }

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }

        tracing::info!(
            code = SESSION_CLOSED,
            conversation_id = %self.conversation_id,
            "conversation session closed"
        );
    }
}

impl<B: ChatBackend> Drop for ConversationSession<B> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.closed = true;
        }
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
    }
}

impl<B: ChatBackend> std::fmt::Debug for ConversationSession<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationSession")
            .field("conversation_id", &self.conversation_id)
            .field("identity", &self.identity)
            .field("live", &self.merge_loop.is_some())
            .finish()
    }
}

/// A send whose provisional entry is visible but whose write has not been issued.
#[must_use = "the message is only written when `complete` is awaited"]
pub struct PendingSend<B: ChatBackend> {
    backend: Arc<B>,
    identity: Identity,
    draft: NewMessage,
    temp_id: TempId,
    shared: Weak<SessionShared>,
}

impl<B: ChatBackend> PendingSend<B> {
    pub fn temp_id(&self) -> TempId {
        self.temp_id
    }

    /// Issues the write and reconciles the provisional entry with its outcome.
    pub async fn complete(self) -> Result<Message, SendMessageError> {
        let result = self
            .backend
            .insert_message(&self.identity, self.draft)
            .await;

        let Some(shared) = self.shared.upgrade().filter(|shared| shared.is_open()) else {
            tracing::debug!(
                code = SEND_COMPLETION_IGNORED,
                temp_id = %self.temp_id,
                "send completed after conversation closed"
            );
            return result.map_err(map_source_error);
        };

        match result {
            Ok(message) => {
                let outcome = shared.update(|state| state.timeline.confirm(self.temp_id, message.clone()));
                tracing::debug!(
                    temp_id = %self.temp_id,
                    message_id = %message.id,
                    outcome = ?outcome,
                    "provisional message reconciled"
                );
                Ok(message)
            }
            Err(error) => {
                tracing::warn!(
                    code = SEND_FAILED,
                    error = ?error,
                    temp_id = %self.temp_id,
                    "message send failed; rolling back optimistic entry"
                );
                let temp_id = self.temp_id;
                shared.update(|state| {
                    state.timeline.rollback(temp_id);
                    state.notices.push(UserNotice::SendFailed { temp_id });
                });
                Err(map_source_error(error))
            }
        }
    }
}

impl<B: ChatBackend> std::fmt::Debug for PendingSend<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingSend")
            .field("temp_id", &self.temp_id)
            .field("conversation_id", &self.draft.conversation_id)
            .finish()
    }
}

async fn run_merge_loop<B: ChatBackend>(
    backend: Arc<B>,
    identity: Identity,
    conversation_id: ConversationId,
    shared: Weak<SessionShared>,
    mut subscription: Subscription,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    tracing::debug!(
                        code = MERGE_LOOP_STOPPED,
                        conversation_id = %conversation_id,
                        "merge loop stopped"
                    );
                    return;
                }
            }
            event = subscription.next_event() => {
                let Some(RealtimeEvent::MessageInserted(message)) = event else {
                    tracing::warn!(
                        code = MERGE_LOOP_CHANNEL_CLOSED,
                        conversation_id = %conversation_id,
                        "realtime channel closed; conversation stops live-updating"
                    );
                    return;
                };

                let outcome = match shared.upgrade() {
                    Some(shared) => shared.merge(message),
                    None => return,
                };
                let Some(outcome) = outcome else {
                    return;
                };
                tracing::debug!(
                    conversation_id = %conversation_id,
                    outcome = ?outcome,
                    "realtime insert merged"
                );

                mark_read(backend.as_ref(), &identity, conversation_id).await;
            }
        }
    }
}
