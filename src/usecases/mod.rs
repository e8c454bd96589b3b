//! Use case layer: application workflows and orchestration.

pub mod bootstrap;
pub mod context;
pub mod contracts;
pub mod conversation_session;
pub mod list_conversations;
pub mod load_messages;
pub mod read_state;
pub mod send_message;
pub mod start_conversation;
pub mod unread_counter;

/// Returns the usecases module name for smoke checks.
pub fn module_name() -> &'static str {
    "usecases"
}
