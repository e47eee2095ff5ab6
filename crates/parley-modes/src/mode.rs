use chrono::{DateTime, Utc};
use parley_core::ParleyResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One agent invocation requested by a mode.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentCall {
    /// Target agent name.
    pub agent_name: String,
    /// Prompt text to send.
    pub prompt: String,
    pub session_id: String,
    /// `"user"` or the name of the agent whose reply produced this call.
    pub caller_name: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AgentCall {
    pub fn new(
        agent_name: impl Into<String>,
        prompt: impl Into<String>,
        session_id: impl Into<String>,
        caller_name: impl Into<String>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            prompt: prompt.into(),
            session_id: session_id.into(),
            caller_name: caller_name.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Validated configuration of a mode instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModeConfig {
    pub name: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, serde_json::Value>,
}

impl ModeConfig {
    /// Default config for a mode that needs nothing beyond its name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            config: HashMap::new(),
        }
    }
}

/// Per-session runtime state of a mode. Reset on every mode switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeState {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_step: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub step_history: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom_state: HashMap<String, serde_json::Value>,
    pub last_update_time: DateTime<Utc>,
}

impl ModeState {
    pub fn fresh() -> Self {
        Self {
            current_step: String::new(),
            step_history: Vec::new(),
            custom_state: HashMap::new(),
            last_update_time: Utc::now(),
        }
    }
}

impl Default for ModeState {
    fn default() -> Self {
        Self::fresh()
    }
}

/// A collaboration policy: maps inbound events to the agent calls to emit.
///
/// Instances are stateless with respect to sessions — anything per-session
/// lives in [`ModeState`], which the orchestrator stores on the session.
pub trait CollaborationMode: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Checks the instance's configuration.
    fn validate(&self) -> ParleyResult<()>;

    /// Called when the mode is bound to a session (create or switch).
    fn initialize(&self, session_id: &str) -> ParleyResult<()>;

    /// A user message arrived; `mentioned_agents` are canonical agent names
    /// in the order the user supplied them.
    fn on_user_message(
        &self,
        session_id: &str,
        content: &str,
        mentioned_agents: &[String],
    ) -> ParleyResult<Vec<AgentCall>>;

    /// An agent replied; returns the follow-up calls its reply requests.
    fn on_agent_response(
        &self,
        session_id: &str,
        agent_name: &str,
        response: &str,
    ) -> ParleyResult<Vec<AgentCall>>;
}
