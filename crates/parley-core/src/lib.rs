//! Shared types for the Parley multi-agent orchestration server.
//!
//! # Main types
//!
//! - [`ParleyError`] / [`ParleyResult`] — Error handling across the workspace.
//! - [`Message`] — A single entry in a session's conversation log.
//! - [`TaskMessage`] — A unit of work carried on the bus.
//! - [`CallHistoryItem`] — Record of one dispatch to an agent and its reply.
//! - [`catalog`] — The static cat catalogue (ids, colours, the human sentinel).

/// Static cat catalogue and id/name/colour lookups.
pub mod catalog;
/// Error enum and result alias.
pub mod error;
/// Conversation messages and sender descriptors.
pub mod message;
/// Bus task payloads and chat-log records.
pub mod task;

pub use catalog::{Cat, HUMAN_SENTINEL, USER_CALLER, USER_ID, USER_NAME};
pub use error::{ParleyError, ParleyResult};
pub use message::{CallHistoryItem, Message, MessageKind, Sender};
pub use task::{next_task_id, ChatRecord, TaskMessage, TaskStatus};

/// Generates a short id of the form `<prefix>_<8 hex chars>`.
pub fn short_id(prefix: &str) -> String {
    let uuid = uuid::Uuid::new_v4().to_string();
    format!("{}_{}", prefix, &uuid[..8])
}
