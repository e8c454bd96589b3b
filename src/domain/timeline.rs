use std::collections::HashSet;

use super::{
    identity::{ConversationId, MessageId, TempId},
    message::{EntryId, Message, TimelineEntry},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineUiState {
    Empty,
    Loading,
    Ready,
}

/// Result of merging a realtime row into the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Appended,
    /// An entry with the same persisted id is already visible.
    Duplicate,
    /// The row belongs to another conversation and was ignored.
    ForeignConversation,
}

/// Result of reconciling a provisional entry with its persisted row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The provisional entry was replaced in place.
    Replaced,
    /// The persisted row had already been merged; the provisional entry was dropped.
    AlreadyMerged,
    /// No provisional entry with that temporary id exists.
    Missing,
}

/// Visible message sequence of one open conversation.
///
/// Every entry id appears at most once. History arrives oldest first and later
/// entries are appended in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTimeline {
    conversation_id: Option<ConversationId>,
    entries: Vec<TimelineEntry>,
    ui_state: TimelineUiState,
}

impl Default for ConversationTimeline {
    fn default() -> Self {
        Self {
            conversation_id: None,
            entries: Vec::new(),
            ui_state: TimelineUiState::Empty,
        }
    }
}

impl ConversationTimeline {
    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn ui_state(&self) -> TimelineUiState {
        self.ui_state
    }

    pub fn set_loading(&mut self, conversation_id: ConversationId) {
        self.conversation_id = Some(conversation_id);
        self.entries.clear();
        self.ui_state = TimelineUiState::Loading;
    }

    /// Installs the loaded history.
    ///
    /// Entries that arrived while the history was loading (provisional sends and
    /// realtime rows) are kept after the history unless the history already has them.
    pub fn set_ready(&mut self, history: Vec<Message>) {
        let mut seen = HashSet::with_capacity(history.len());
        let mut entries = Vec::with_capacity(history.len() + self.entries.len());

        for message in history {
            if seen.insert(message.id) {
                entries.push(TimelineEntry::from(message));
            }
        }

        for entry in self.entries.drain(..) {
            match entry.id {
                EntryId::Persisted(id) if !seen.insert(id) => {}
                _ => entries.push(entry),
            }
        }

        self.entries = entries;
        self.ui_state = TimelineUiState::Ready;
    }

    pub fn clear(&mut self) {
        self.conversation_id = None;
        self.entries.clear();
        self.ui_state = TimelineUiState::Empty;
    }

    pub fn contains_persisted(&self, id: MessageId) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.id == EntryId::Persisted(id))
    }

    pub fn push_provisional(&mut self, entry: TimelineEntry) {
        debug_assert!(entry.is_provisional());
        self.entries.push(entry);
    }

    /// Replaces the provisional entry `temp_id` with its persisted row.
    pub fn confirm(&mut self, temp_id: TempId, message: Message) -> ConfirmOutcome {
        let Some(index) = self.position(EntryId::Provisional(temp_id)) else {
            return ConfirmOutcome::Missing;
        };

        if self.contains_persisted(message.id) {
            self.entries.remove(index);
            return ConfirmOutcome::AlreadyMerged;
        }

        self.entries[index] = TimelineEntry::from(message);
        ConfirmOutcome::Replaced
    }

    /// Removes the provisional entry `temp_id`. Returns whether it was present.
    pub fn rollback(&mut self, temp_id: TempId) -> bool {
        match self.position(EntryId::Provisional(temp_id)) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Appends a realtime row unless its persisted id is already visible.
    pub fn merge_incoming(&mut self, message: Message) -> MergeOutcome {
        if self.conversation_id != Some(message.conversation_id) {
            return MergeOutcome::ForeignConversation;
        }

        if self.contains_persisted(message.id) {
            return MergeOutcome::Duplicate;
        }

        self.entries.push(TimelineEntry::from(message));
        MergeOutcome::Appended
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.is_provisional())
            .count()
    }

    fn position(&self, id: EntryId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::{
        identity::UserId,
        message::{MessageKind, NewMessage},
    };

    fn message(conversation_id: ConversationId, text: &str) -> Message {
        Message {
            id: MessageId::new(),
            conversation_id,
            sender_id: UserId::new(),
            content: text.to_owned(),
            kind: MessageKind::Text,
            created_at: Utc::now(),
        }
    }

    fn provisional(conversation_id: ConversationId, text: &str) -> (TempId, TimelineEntry) {
        let temp_id = TempId::new();
        let draft = NewMessage {
            conversation_id,
            sender_id: UserId::new(),
            content: text.to_owned(),
            kind: MessageKind::Text,
        };
        (temp_id, TimelineEntry::provisional(temp_id, &draft, Utc::now()))
    }

    fn ready(conversation_id: ConversationId) -> ConversationTimeline {
        let mut timeline = ConversationTimeline::default();
        timeline.set_loading(conversation_id);
        timeline.set_ready(vec![]);
        timeline
    }

    fn persisted_count(timeline: &ConversationTimeline, id: MessageId) -> usize {
        timeline
            .entries()
            .iter()
            .filter(|entry| entry.id == EntryId::Persisted(id))
            .count()
    }

    #[test]
    fn default_timeline_is_empty() {
        let timeline = ConversationTimeline::default();

        assert_eq!(timeline.ui_state(), TimelineUiState::Empty);
        assert!(timeline.entries().is_empty());
    }

    #[test]
    fn set_loading_then_ready_keeps_history_order() {
        let conversation_id = ConversationId::new();
        let mut timeline = ConversationTimeline::default();
        timeline.set_loading(conversation_id);
        assert_eq!(timeline.ui_state(), TimelineUiState::Loading);

        let first = message(conversation_id, "first");
        let second = message(conversation_id, "second");
        timeline.set_ready(vec![first.clone(), second.clone()]);

        assert_eq!(timeline.ui_state(), TimelineUiState::Ready);
        let contents: Vec<_> = timeline.entries().iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, ["first", "second"]);
    }

    #[test]
    fn set_ready_keeps_entries_that_arrived_while_loading() {
        let conversation_id = ConversationId::new();
        let mut timeline = ConversationTimeline::default();
        timeline.set_loading(conversation_id);

        let (_, pending) = provisional(conversation_id, "typed early");
        timeline.push_provisional(pending);
        let echoed = message(conversation_id, "echo");
        timeline.merge_incoming(echoed.clone());

        timeline.set_ready(vec![message(conversation_id, "old"), echoed.clone()]);

        let contents: Vec<_> = timeline.entries().iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, ["old", "echo", "typed early"]);
        assert_eq!(persisted_count(&timeline, echoed.id), 1);
    }

    #[test]
    fn merge_incoming_appends_new_rows() {
        let conversation_id = ConversationId::new();
        let mut timeline = ready(conversation_id);

        let outcome = timeline.merge_incoming(message(conversation_id, "hi"));

        assert_eq!(outcome, MergeOutcome::Appended);
        assert_eq!(timeline.entries().len(), 1);
    }

    #[test]
    fn merge_incoming_discards_duplicates() {
        let conversation_id = ConversationId::new();
        let mut timeline = ready(conversation_id);
        let row = message(conversation_id, "hi");

        timeline.merge_incoming(row.clone());
        let outcome = timeline.merge_incoming(row.clone());

        assert_eq!(outcome, MergeOutcome::Duplicate);
        assert_eq!(persisted_count(&timeline, row.id), 1);
    }

    #[test]
    fn merge_incoming_ignores_rows_of_other_conversations() {
        let mut timeline = ready(ConversationId::new());

        let outcome = timeline.merge_incoming(message(ConversationId::new(), "elsewhere"));

        assert_eq!(outcome, MergeOutcome::ForeignConversation);
        assert!(timeline.entries().is_empty());
    }

    #[test]
    fn confirm_replaces_provisional_in_place() {
        let conversation_id = ConversationId::new();
        let mut timeline = ready(conversation_id);
        let (temp_id, pending) = provisional(conversation_id, "hello");
        timeline.push_provisional(pending);
        timeline.merge_incoming(message(conversation_id, "after"));

        let row = message(conversation_id, "hello");
        let outcome = timeline.confirm(temp_id, row.clone());

        assert_eq!(outcome, ConfirmOutcome::Replaced);
        assert_eq!(timeline.entries()[0].id, EntryId::Persisted(row.id));
        assert_eq!(timeline.entries()[1].content, "after");
        assert_eq!(timeline.pending_count(), 0);
    }

    #[test]
    fn echo_before_confirm_leaves_single_entry() {
        let conversation_id = ConversationId::new();
        let mut timeline = ready(conversation_id);
        let (temp_id, pending) = provisional(conversation_id, "hello");
        timeline.push_provisional(pending);
        let row = message(conversation_id, "hello");

        assert_eq!(timeline.merge_incoming(row.clone()), MergeOutcome::Appended);
        assert_eq!(
            timeline.confirm(temp_id, row.clone()),
            ConfirmOutcome::AlreadyMerged
        );

        assert_eq!(timeline.entries().len(), 1);
        assert_eq!(persisted_count(&timeline, row.id), 1);
    }

    #[test]
    fn echo_after_confirm_is_discarded() {
        let conversation_id = ConversationId::new();
        let mut timeline = ready(conversation_id);
        let (temp_id, pending) = provisional(conversation_id, "hello");
        timeline.push_provisional(pending);
        let row = message(conversation_id, "hello");

        timeline.confirm(temp_id, row.clone());
        assert_eq!(timeline.merge_incoming(row.clone()), MergeOutcome::Duplicate);

        assert_eq!(timeline.entries().len(), 1);
    }

    #[test]
    fn rollback_removes_only_matching_provisional_entry() {
        let conversation_id = ConversationId::new();
        let mut timeline = ready(conversation_id);
        let (failed, first) = provisional(conversation_id, "first");
        let (kept, second) = provisional(conversation_id, "second");
        timeline.push_provisional(first);
        timeline.push_provisional(second);

        assert!(timeline.rollback(failed));
        assert!(!timeline.rollback(failed));

        assert_eq!(timeline.entries().len(), 1);
        assert_eq!(timeline.entries()[0].id, EntryId::Provisional(kept));
    }

    #[test]
    fn confirm_unknown_temp_id_is_missing() {
        let conversation_id = ConversationId::new();
        let mut timeline = ready(conversation_id);

        let outcome = timeline.confirm(TempId::new(), message(conversation_id, "ghost"));

        assert_eq!(outcome, ConfirmOutcome::Missing);
        assert!(timeline.entries().is_empty());
    }

    #[test]
    fn clear_resets_to_empty() {
        let conversation_id = ConversationId::new();
        let mut timeline = ready(conversation_id);
        timeline.merge_incoming(message(conversation_id, "hi"));

        timeline.clear();

        assert_eq!(timeline.ui_state(), TimelineUiState::Empty);
        assert!(timeline.entries().is_empty());
        assert_eq!(
            timeline.merge_incoming(message(conversation_id, "late")),
            MergeOutcome::ForeignConversation
        );
    }
}
