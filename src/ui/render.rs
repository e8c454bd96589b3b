//! Plain-text timeline rendering.
//!
//! Handles visual formatting of timeline entries including:
//! - Time + sender header, message text indented below
//! - Sender grouping (consecutive entries from same sender show name only once)
//! - Date separators between entries from different days
//! - A marker on entries still waiting for the store to confirm them

use std::collections::HashMap;

use chrono::{DateTime, Local, NaiveDate, Utc};

use crate::domain::{
    events::UserNotice, identity::UserId, message::TimelineEntry, unread::UnreadBadge,
};

const INDENT: &str = "      ";
const PENDING_MARKER: &str = "(sending)";

/// Represents a visual element in the timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineElement {
    /// Date separator line (e.g., "——— 14 Feb 2026 ———").
    DateSeparator(String),
    Entry {
        time: String,
        sender: Option<String>,
        content: String,
        pending: bool,
    },
}

/// Display names keyed by user id, with the viewer shown as "You".
#[derive(Debug, Clone)]
pub struct SenderNames {
    viewer: Option<UserId>,
    names: HashMap<UserId, String>,
}

impl SenderNames {
    pub fn new(viewer: Option<UserId>) -> Self {
        Self {
            viewer,
            names: HashMap::new(),
        }
    }

    pub fn with_name(mut self, user_id: UserId, name: impl Into<String>) -> Self {
        self.names.insert(user_id, name.into());
        self
    }

    pub fn name_of(&self, user_id: UserId) -> String {
        if self.viewer == Some(user_id) {
            return "You".to_owned();
        }

        self.names
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| {
                let short: String = user_id.to_string().chars().take(8).collect();
                format!("user-{short}")
            })
    }
}

/// Builds the element list for a timeline, grouping by sender and day.
pub fn build_timeline_elements(
    entries: &[TimelineEntry],
    names: &SenderNames,
) -> Vec<TimelineElement> {
    let mut elements = Vec::new();
    let mut prev_date: Option<NaiveDate> = None;
    let mut prev_sender: Option<UserId> = None;

    for entry in entries {
        let date = local_date(entry.created_at);
        if prev_date != Some(date) {
            elements.push(TimelineElement::DateSeparator(format_date(date)));
            prev_sender = None;
        }

        let sender = (prev_sender != Some(entry.sender_id)).then(|| names.name_of(entry.sender_id));

        elements.push(TimelineElement::Entry {
            time: format_time(entry.created_at),
            sender,
            content: entry.display_content(),
            pending: entry.is_provisional(),
        });

        prev_date = Some(date);
        prev_sender = Some(entry.sender_id);
    }

    elements
}

/// Renders elements to printable lines.
pub fn render_lines(elements: &[TimelineElement]) -> Vec<String> {
    let mut lines = Vec::new();

    for element in elements {
        match element {
            TimelineElement::DateSeparator(date) => lines.push(format!("——— {date} ———")),
            TimelineElement::Entry {
                time,
                sender,
                content,
                pending,
            } => {
                let mut text = content.lines().collect::<Vec<_>>();
                if text.is_empty() {
                    text.push("[Empty message]");
                }

                match sender {
                    Some(name) => {
                        lines.push(format!("{time:>5} {name}:"));
                        lines.extend(text.iter().map(|line| format!("{INDENT}{line}")));
                    }
                    None => {
                        lines.push(format!("{time:>5} {}", text[0]));
                        lines.extend(text[1..].iter().map(|line| format!("{INDENT}{line}")));
                    }
                }

                if *pending {
                    if let Some(last) = lines.last_mut() {
                        last.push(' ');
                        last.push_str(PENDING_MARKER);
                    }
                }
            }
        }
    }

    lines
}

pub fn render_timeline(entries: &[TimelineEntry], names: &SenderNames) -> Vec<String> {
    render_lines(&build_timeline_elements(entries, names))
}

/// Navigation label with the unread badge, e.g. "Messages (3)".
pub fn badge_line(badge: &UnreadBadge) -> String {
    match badge.label() {
        Some(label) => format!("Messages ({label})"),
        None => "Messages".to_owned(),
    }
}

pub fn notice_line(notice: &UserNotice) -> String {
    format!("! {}", notice.text())
}

fn local_date(at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&Local).date_naive()
}

fn format_date(date: NaiveDate) -> String {
    date.format("%-d %b %Y").to_string()
}

fn format_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M").to_string()
}
