use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::{
    domain::{
        conversation::{ConversationSummary, ParticipantPair, Profile},
        events::SubscriptionScope,
        identity::{ConversationId, Identity, MessageId, UserId},
        message::{Message, NewMessage},
    },
    usecases::{
        contracts::{
            ConversationDirectory, DirectorySourceError, RealtimeFeed, SubscribeError,
            Subscription,
        },
        load_messages::{MessageHistorySource, MessagesSourceError},
        read_state::{ReadStateSourceError, ReadStateStore},
        send_message::{MessageWriter, SendMessageSourceError},
    },
};

use super::realtime::RealtimeHub;

const BACKEND_FAULT_INJECTED: &str = "BACKEND_FAULT_INJECTED";
const BACKEND_CONVERSATION_CREATED: &str = "BACKEND_CONVERSATION_CREATED";

/// Simulated hosted backend: tables, row-level checks, procedures and realtime fan-out.
#[derive(Debug)]
pub struct InMemoryBackend {
    tables: Mutex<Tables>,
    realtime: RealtimeHub,
    faults: Mutex<Faults>,
    latency: Duration,
    acks_open: watch::Sender<bool>,
    insert_calls: AtomicUsize,
    unread_count_calls: AtomicUsize,
}

#[derive(Debug, Default)]
struct Tables {
    profiles: HashMap<UserId, Profile>,
    conversations: HashMap<ConversationId, ConversationRow>,
    by_pair: HashMap<ParticipantPair, ConversationId>,
    messages: Vec<Message>,
    clock: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct ConversationRow {
    pair: ParticipantPair,
    created_at: DateTime<Utc>,
    last_read_at: HashMap<UserId, DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Faults {
    failing_writes: u32,
    failing_inserts: u32,
    failing_reads: u32,
    failing_subscribes: u32,
}

impl Tables {
    /// Strictly increasing server clock.
    fn now(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.clock {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.clock = Some(next);
        next
    }

    fn participant_conversation(
        &self,
        identity: &Identity,
        conversation_id: ConversationId,
    ) -> Result<&ConversationRow, Access> {
        let row = self
            .conversations
            .get(&conversation_id)
            .ok_or(Access::Missing)?;
        if row.pair.contains(identity.user_id()) {
            Ok(row)
        } else {
            Err(Access::Denied)
        }
    }
}

enum Access {
    Missing,
    Denied,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl InMemoryBackend {
    pub fn new(latency: Duration) -> Self {
        let (acks_open, _) = watch::channel(true);
        Self {
            tables: Mutex::new(Tables::default()),
            realtime: RealtimeHub::new(),
            faults: Mutex::new(Faults::default()),
            latency,
            acks_open,
            insert_calls: AtomicUsize::new(0),
            unread_count_calls: AtomicUsize::new(0),
        }
    }

    /// Registers a profile and returns its id. Registering a taken username returns the existing id.
    pub fn register_user(&self, username: &str) -> UserId {
        let Ok(mut tables) = self.tables.lock() else {
            return UserId::new();
        };

        if let Some(existing) = tables
            .profiles
            .values()
            .find(|profile| profile.username.as_deref() == Some(username))
        {
            return existing.id;
        }

        let id = UserId::new();
        tables.profiles.insert(
            id,
            Profile {
                id,
                username: Some(username.to_owned()),
                avatar_type: None,
            },
        );
        id
    }

    pub fn find_user(&self, username: &str) -> Option<UserId> {
        let tables = self.tables.lock().ok()?;
        tables
            .profiles
            .values()
            .find(|profile| profile.username.as_deref() == Some(username))
            .map(|profile| profile.id)
    }

    pub fn realtime(&self) -> &RealtimeHub {
        &self.realtime
    }

    /// Makes the next `count` writes (insert, mark-read, get-or-create) fail.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn fail_next_writes(&self, count: u32) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.failing_writes = count;
        }
    }

    /// Makes the next `count` message inserts fail, leaving other writes alone.
    pub fn fail_next_inserts(&self, count: u32) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.failing_inserts = count;
        }
    }

    /// Makes the next `count` reads (history, unread count, listings) fail.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn fail_next_reads(&self, count: u32) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.failing_reads = count;
        }
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn fail_next_subscribes(&self, count: u32) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.failing_subscribes = count;
        }
    }

    /// Commits and publishes inserts as usual but delays their acknowledgement
    /// until `release_acknowledgements`.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn hold_acknowledgements(&self) {
        self.acks_open.send_replace(false);
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn release_acknowledgements(&self) {
        self.acks_open.send_replace(true);
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn unread_count_calls(&self) -> usize {
        self.unread_count_calls.load(Ordering::SeqCst)
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn read_cursor(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Option<DateTime<Utc>> {
        let tables = self.tables.lock().ok()?;
        tables
            .conversations
            .get(&conversation_id)?
            .last_read_at
            .get(&user_id)
            .copied()
    }

    fn tables(&self) -> Option<MutexGuard<'_, Tables>> {
        self.tables.lock().ok()
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    async fn wait_for_acknowledgement(&self) {
        let mut open = self.acks_open.subscribe();
        let _ = open.wait_for(|open| *open).await;
    }

    fn take_fault(&self, pick: fn(&mut Faults) -> &mut u32, operation: &'static str) -> bool {
        let Ok(mut faults) = self.faults.lock() else {
            return false;
        };

        let remaining = pick(&mut *faults);
        if *remaining == 0 {
            return false;
        }

        *remaining -= 1;
        tracing::debug!(code = BACKEND_FAULT_INJECTED, operation, "injected backend failure");
        true
    }

    fn write_fault(&self, operation: &'static str) -> bool {
        self.take_fault(|faults| &mut faults.failing_writes, operation)
    }

    fn read_fault(&self, operation: &'static str) -> bool {
        self.take_fault(|faults| &mut faults.failing_reads, operation)
    }
}

#[async_trait]
impl MessageHistorySource for InMemoryBackend {
    async fn list_messages(
        &self,
        identity: &Identity,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, MessagesSourceError> {
        self.simulate_latency().await;
        if self.read_fault("list_messages") {
            return Err(MessagesSourceError::Unavailable);
        }

        let tables = self.tables().ok_or(MessagesSourceError::Unavailable)?;
        tables
            .participant_conversation(identity, conversation_id)
            .map_err(|access| match access {
                Access::Missing => MessagesSourceError::ConversationNotFound,
                Access::Denied => MessagesSourceError::Unauthorized,
            })?;

        let mut messages: Vec<Message> = tables
            .messages
            .iter()
            .filter(|message| message.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by_key(|message| message.created_at);
        Ok(messages)
    }
}

#[async_trait]
impl MessageWriter for InMemoryBackend {
    async fn insert_message(
        &self,
        identity: &Identity,
        message: NewMessage,
    ) -> Result<Message, SendMessageSourceError> {
        self.simulate_latency().await;
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_fault(|faults| &mut faults.failing_inserts, "insert_message")
            || self.write_fault("insert_message")
        {
            return Err(SendMessageSourceError::Unavailable);
        }

        let row = {
            let mut tables = self.tables().ok_or(SendMessageSourceError::Unavailable)?;
            tables
                .participant_conversation(identity, message.conversation_id)
                .map_err(|access| match access {
                    Access::Missing => SendMessageSourceError::ConversationNotFound,
                    Access::Denied => SendMessageSourceError::Forbidden,
                })?;
            if message.sender_id != identity.user_id() {
                return Err(SendMessageSourceError::Forbidden);
            }

            let row = Message {
                id: MessageId::new(),
                conversation_id: message.conversation_id,
                sender_id: message.sender_id,
                content: message.content,
                kind: message.kind,
                created_at: tables.now(),
            };
            tables.messages.push(row.clone());
            row
        };

        self.realtime.publish(&row);
        self.wait_for_acknowledgement().await;
        Ok(row)
    }
}

#[async_trait]
impl ReadStateStore for InMemoryBackend {
    async fn mark_conversation_as_read(
        &self,
        identity: &Identity,
        conversation_id: ConversationId,
    ) -> Result<(), ReadStateSourceError> {
        self.simulate_latency().await;
        if self.write_fault("mark_conversation_as_read") {
            return Err(ReadStateSourceError::Unavailable);
        }

        let mut tables = self.tables().ok_or(ReadStateSourceError::Unavailable)?;
        tables
            .participant_conversation(identity, conversation_id)
            .map_err(|access| match access {
                Access::Missing => ReadStateSourceError::ConversationNotFound,
                Access::Denied => ReadStateSourceError::Unauthorized,
            })?;

        let now = tables.now();
        if let Some(row) = tables.conversations.get_mut(&conversation_id) {
            let cursor = row.last_read_at.entry(identity.user_id()).or_insert(now);
            if *cursor < now {
                *cursor = now;
            }
        }
        Ok(())
    }

    async fn get_unread_count(&self, identity: &Identity) -> Result<u32, ReadStateSourceError> {
        self.simulate_latency().await;
        self.unread_count_calls.fetch_add(1, Ordering::SeqCst);
        if self.read_fault("get_unread_count") {
            return Err(ReadStateSourceError::Unavailable);
        }

        let tables = self.tables().ok_or(ReadStateSourceError::Unavailable)?;
        let user_id = identity.user_id();
        let count = tables
            .messages
            .iter()
            .filter(|message| message.sender_id != user_id)
            .filter(|message| {
                tables
                    .conversations
                    .get(&message.conversation_id)
                    .filter(|row| row.pair.contains(user_id))
                    .is_some_and(|row| match row.last_read_at.get(&user_id) {
                        Some(cursor) => message.created_at > *cursor,
                        None => true,
                    })
            })
            .count();

        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }
}

#[async_trait]
impl ConversationDirectory for InMemoryBackend {
    async fn create_new_conversation(
        &self,
        identity: &Identity,
        other_user_id: UserId,
    ) -> Result<ConversationId, DirectorySourceError> {
        self.simulate_latency().await;
        if self.write_fault("create_new_conversation") {
            return Err(DirectorySourceError::Unavailable);
        }

        let me = identity.user_id();
        if me == other_user_id {
            return Err(DirectorySourceError::Forbidden);
        }

        let mut tables = self.tables().ok_or(DirectorySourceError::Unavailable)?;
        if !tables.profiles.contains_key(&other_user_id) {
            return Err(DirectorySourceError::NotFound);
        }

        let pair = ParticipantPair::new(me, other_user_id);
        if let Some(existing) = tables.by_pair.get(&pair) {
            return Ok(*existing);
        }

        let conversation_id = ConversationId::new();
        let created_at = tables.now();
        tables.conversations.insert(
            conversation_id,
            ConversationRow {
                pair,
                created_at,
                last_read_at: HashMap::new(),
            },
        );
        tables.by_pair.insert(pair, conversation_id);

        tracing::info!(
            code = BACKEND_CONVERSATION_CREATED,
            conversation_id = %conversation_id,
            "conversation created"
        );
        Ok(conversation_id)
    }

    async fn list_conversations(
        &self,
        identity: &Identity,
    ) -> Result<Vec<ConversationSummary>, DirectorySourceError> {
        self.simulate_latency().await;
        if self.read_fault("list_conversations") {
            return Err(DirectorySourceError::Unavailable);
        }

        let tables = self.tables().ok_or(DirectorySourceError::Unavailable)?;
        let user_id = identity.user_id();
        let mut rows: Vec<_> = tables
            .conversations
            .iter()
            .filter_map(|(id, row)| row.pair.other(user_id).map(|other| (*id, row, other)))
            .collect();
        rows.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at));

        Ok(rows
            .into_iter()
            .map(|(conversation_id, _, other)| ConversationSummary {
                conversation_id,
                other_user: tables.profiles.get(&other).cloned(),
            })
            .collect())
    }

    async fn fetch_profile(&self, user_id: UserId) -> Result<Profile, DirectorySourceError> {
        self.simulate_latency().await;
        if self.read_fault("fetch_profile") {
            return Err(DirectorySourceError::Unavailable);
        }

        let tables = self.tables().ok_or(DirectorySourceError::Unavailable)?;
        tables
            .profiles
            .get(&user_id)
            .cloned()
            .ok_or(DirectorySourceError::NotFound)
    }
}

impl RealtimeFeed for InMemoryBackend {
    fn subscribe(&self, scope: SubscriptionScope) -> Result<Subscription, SubscribeError> {
        if self.take_fault(|faults| &mut faults.failing_subscribes, "subscribe") {
            return Err(SubscribeError::Unavailable);
        }

        Ok(self.realtime.subscribe(scope))
    }
}
