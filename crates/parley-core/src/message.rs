use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The category of a conversation [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Sent by the human user.
    User,
    /// Sent by an agent (a "cat").
    Agent,
    /// Emitted by the server (join notices, welcome lines).
    System,
}

/// Descriptor attached to user and agent messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: String,
    pub name: String,
    pub avatar: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// A single conversational entry. Append-only: never reordered, never edited
/// after emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<Sender>,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
}

impl Message {
    pub fn new(
        kind: MessageKind,
        content: impl Into<String>,
        session_id: impl Into<String>,
        sender: Option<Sender>,
    ) -> Self {
        Self {
            id: crate::short_id("msg"),
            kind,
            content: content.into(),
            sender,
            timestamp: Utc::now(),
            session_id: session_id.into(),
        }
    }

    pub fn user(
        content: impl Into<String>,
        session_id: impl Into<String>,
        sender: Sender,
    ) -> Self {
        Self::new(MessageKind::User, content, session_id, Some(sender))
    }

    pub fn agent(
        content: impl Into<String>,
        session_id: impl Into<String>,
        sender: Sender,
    ) -> Self {
        Self::new(MessageKind::Agent, content, session_id, Some(sender))
    }

    pub fn system(content: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self::new(MessageKind::System, content, session_id, None)
    }
}

/// Record of one dispatch to an agent. `response` starts empty and is filled
/// in exactly once when the agent's reply arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallHistoryItem {
    pub cat_id: String,
    pub cat_name: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub prompt: String,
    #[serde(default)]
    pub response: String,
}

impl CallHistoryItem {
    pub fn new(
        cat_id: impl Into<String>,
        cat_name: impl Into<String>,
        session_id: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            cat_id: cat_id.into(),
            cat_name: cat_name.into(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
            prompt: prompt.into(),
            response: String::new(),
        }
    }
}
