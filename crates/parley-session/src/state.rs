use chrono::{DateTime, Utc};
use parley_core::{CallHistoryItem, Message, MessageKind};
use parley_modes::{ModeConfig, ModeState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Maximum characters of the first user message used for the auto summary.
const SUMMARY_CHARS: usize = 30;

/// In-memory state of one session. Mutated only under the session's lock.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub id: String,
    pub name: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Counts user and agent messages; system notices are excluded.
    pub message_count: usize,
    pub messages: Vec<Message>,
    pub call_history: Vec<CallHistoryItem>,
    /// Agents for which a join notice has already been emitted.
    pub joined_cats: BTreeSet<String>,
}

impl SessionState {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: "新对话".to_string(),
            summary: String::new(),
            created_at: now,
            updated_at: now,
            message_count: 0,
            messages: Vec::new(),
            call_history: Vec::new(),
            joined_cats: BTreeSet::new(),
        }
    }

    /// Appends a message, bumping the count for user/agent entries.
    pub fn push_message(&mut self, message: Message) {
        if message.kind != MessageKind::System {
            self.message_count += 1;
        }
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// Sets the auto summary from the first user message.
    pub fn maybe_set_summary(&mut self, content: &str) {
        if !self.summary.is_empty() || content.is_empty() {
            return;
        }
        let mut head: String = content.chars().take(SUMMARY_CHARS).collect();
        if content.chars().count() > SUMMARY_CHARS {
            head.push_str("...");
        }
        self.summary = format!("用户：{}", head);
    }

    /// Fills the most recent unanswered call-history item for `cat_name`.
    /// Returns false when none exists.
    pub fn fill_call_response(&mut self, cat_name: &str, response: &str) -> bool {
        if let Some(item) = self
            .call_history
            .iter_mut()
            .rev()
            .find(|i| i.cat_name == cat_name && i.response.is_empty())
        {
            item.response = response.to_string();
            true
        } else {
            false
        }
    }

    pub fn summary_view(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            summary: self.summary.clone(),
            updated_at: self.updated_at,
            message_count: self.message_count,
        }
    }
}

/// The client-facing session listing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub name: String,
    pub summary: String,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

/// Flat snapshot of a session plus its mode triple, as persisted at
/// `session:<id>` in the bus KV store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub id: String,
    pub name: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub messages: Vec<Message>,
    pub call_history: Vec<CallHistoryItem>,
    pub joined_cats: BTreeSet<String>,
    pub mode_name: String,
    pub mode_config: ModeConfig,
    pub mode_state: ModeState,
}

impl SessionData {
    pub fn from_state(
        state: &SessionState,
        mode_name: String,
        mode_config: ModeConfig,
        mode_state: ModeState,
    ) -> Self {
        Self {
            id: state.id.clone(),
            name: state.name.clone(),
            summary: state.summary.clone(),
            created_at: state.created_at,
            updated_at: state.updated_at,
            message_count: state.message_count,
            messages: state.messages.clone(),
            call_history: state.call_history.clone(),
            joined_cats: state.joined_cats.clone(),
            mode_name,
            mode_config,
            mode_state,
        }
    }

    pub fn into_state(self) -> SessionState {
        SessionState {
            id: self.id,
            name: self.name,
            summary: self.summary,
            created_at: self.created_at,
            updated_at: self.updated_at,
            message_count: self.message_count,
            messages: self.messages,
            call_history: self.call_history,
            joined_cats: self.joined_cats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_count_skips_system() {
        let mut state = SessionState::new("sess_1");
        state.push_message(Message::system("会话已创建，猫猫们已就位！", "sess_1"));
        assert_eq!(state.message_count, 0);

        let sender = parley_core::Sender {
            id: "user_001".into(),
            name: "用户".into(),
            avatar: String::new(),
            color: None,
        };
        state.push_message(Message::user("hi", "sess_1", sender));
        assert_eq!(state.message_count, 1);
        assert_eq!(state.messages.len(), 2);
    }

    #[test]
    fn test_summary_truncation() {
        let mut state = SessionState::new("sess_1");
        state.maybe_set_summary("短");
        assert_eq!(state.summary, "用户：短");

        let mut long = SessionState::new("sess_2");
        let content = "一".repeat(45);
        long.maybe_set_summary(&content);
        assert_eq!(long.summary, format!("用户：{}...", "一".repeat(30)));

        // First summary wins.
        state.maybe_set_summary("另一条");
        assert_eq!(state.summary, "用户：短");
    }

    #[test]
    fn test_fill_call_response_back_to_front() {
        let mut state = SessionState::new("sess_1");
        state
            .call_history
            .push(CallHistoryItem::new("cat_001", "花花", "sess_1", "first"));
        state
            .call_history
            .push(CallHistoryItem::new("cat_001", "花花", "sess_1", "second"));

        assert!(state.fill_call_response("花花", "answer"));
        // The most recent unanswered item is filled first.
        assert_eq!(state.call_history[1].response, "answer");
        assert!(state.call_history[0].response.is_empty());

        assert!(state.fill_call_response("花花", "earlier"));
        assert_eq!(state.call_history[0].response, "earlier");

        assert!(!state.fill_call_response("花花", "extra"));
        assert!(!state.fill_call_response("薇薇", "nobody asked"));
    }

    #[test]
    fn test_session_data_round_trip() {
        let mut state = SessionState::new("sess_1");
        state.push_message(Message::system("会话已创建，猫猫们已就位！", "sess_1"));
        state.joined_cats.insert("花花".to_string());
        state
            .call_history
            .push(CallHistoryItem::new("cat_001", "花花", "sess_1", "hi"));

        let data = SessionData::from_state(
            &state,
            "free_discussion".into(),
            ModeConfig::named("free_discussion"),
            ModeState::fresh(),
        );
        let json = serde_json::to_string(&data).unwrap();
        let back: SessionData = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id, "sess_1");
        assert_eq!(back.messages.len(), 1);
        assert_eq!(back.call_history.len(), 1);
        assert!(back.joined_cats.contains("花花"));
        assert_eq!(back.mode_name, "free_discussion");

        let restored = back.into_state();
        assert_eq!(restored.message_count, state.message_count);
        assert_eq!(restored.messages.len(), state.messages.len());
    }

    #[test]
    fn test_snapshot_wire_field_names() {
        let state = SessionState::new("sess_1");
        let data = SessionData::from_state(
            &state,
            "free_discussion".into(),
            ModeConfig::named("free_discussion"),
            ModeState::fresh(),
        );
        let json = serde_json::to_value(&data).unwrap();
        for key in [
            "id",
            "name",
            "summary",
            "createdAt",
            "updatedAt",
            "messageCount",
            "messages",
            "callHistory",
            "joinedCats",
            "modeName",
            "modeConfig",
            "modeState",
        ] {
            assert!(json.get(key).is_some(), "missing field {}", key);
        }
    }
}
