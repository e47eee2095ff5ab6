//! Per-session collaboration-mode state and event delegation.
//!
//! The orchestrator binds each session to a mode instance plus its runtime
//! [`ModeState`], and turns inbound events into `[AgentCall]` lists by
//! delegating to the mode. It never dispatches calls itself — returning them
//! lets the session manager record history and emit join notices first.

use chrono::{DateTime, Utc};
use parley_core::{ParleyError, ParleyResult};
use parley_modes::{AgentCall, CollaborationMode, ModeConfig, ModeInfo, ModeRegistry, ModeState};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// The mode binding of one session.
#[derive(Clone)]
pub struct ModeBinding {
    pub mode: Arc<dyn CollaborationMode>,
    pub mode_config: ModeConfig,
    pub mode_state: ModeState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Coordinates collaboration modes across sessions.
pub struct Orchestrator {
    registry: Arc<ModeRegistry>,
    default_mode: String,
    sessions: RwLock<HashMap<String, ModeBinding>>,
}

impl Orchestrator {
    pub fn new(registry: Arc<ModeRegistry>, default_mode: impl Into<String>) -> Self {
        Self {
            registry,
            default_mode: default_mode.into(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Binds a new session to a mode. Fails if the id is already registered;
    /// a mode whose `initialize` fails leaves no binding behind.
    pub async fn create_session(
        &self,
        session_id: &str,
        mode_name: Option<&str>,
        mode_config: Option<ModeConfig>,
    ) -> ParleyResult<()> {
        let name = mode_name.unwrap_or(&self.default_mode).to_string();
        let config = mode_config.unwrap_or_else(|| ModeConfig::named(&name));
        let mode = self.resolve_mode(&name, &config)?;

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(session_id) {
            return Err(ParleyError::Session(format!(
                "session {} already exists",
                session_id
            )));
        }
        mode.initialize(session_id)?;
        let now = Utc::now();
        sessions.insert(
            session_id.to_string(),
            ModeBinding {
                mode,
                mode_config: config,
                mode_state: ModeState::fresh(),
                created_at: now,
                updated_at: now,
            },
        );
        info!(session_id = %session_id, mode = %name, "session bound to mode");
        Ok(())
    }

    /// Rebinds a restored session with its persisted mode triple.
    pub async fn restore_session(
        &self,
        session_id: &str,
        mode_name: &str,
        mode_config: ModeConfig,
        mode_state: ModeState,
    ) -> ParleyResult<()> {
        let mode = self.resolve_mode(mode_name, &mode_config)?;
        mode.initialize(session_id)?;
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            session_id.to_string(),
            ModeBinding {
                mode,
                mode_config,
                mode_state,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    /// Switches a session to a new mode. The previous [`ModeState`] is
    /// discarded: step history and custom state start fresh.
    pub async fn switch_mode(
        &self,
        session_id: &str,
        mode_name: &str,
        mode_config: Option<ModeConfig>,
    ) -> ParleyResult<()> {
        let config = mode_config.unwrap_or_else(|| ModeConfig::named(mode_name));
        let mode = self.resolve_mode(mode_name, &config)?;

        let mut sessions = self.sessions.write().await;
        let binding = sessions
            .get_mut(session_id)
            .ok_or_else(|| ParleyError::NotFound(format!("session {}", session_id)))?;
        mode.initialize(session_id)?;
        binding.mode = mode;
        binding.mode_config = config;
        binding.mode_state = ModeState::fresh();
        binding.updated_at = Utc::now();
        info!(session_id = %session_id, mode = %mode_name, "mode switched");
        Ok(())
    }

    pub async fn delete_session(&self, session_id: &str) -> ParleyResult<()> {
        let mut sessions = self.sessions.write().await;
        sessions
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| ParleyError::NotFound(format!("session {}", session_id)))
    }

    /// Delegates a user message to the session's mode.
    pub async fn handle_user_message(
        &self,
        session_id: &str,
        content: &str,
        mentioned_agents: &[String],
    ) -> ParleyResult<Vec<AgentCall>> {
        let mode = self.mode_of(session_id).await?;
        let calls = mode.on_user_message(session_id, content, mentioned_agents)?;
        self.touch(session_id).await;
        Ok(calls)
    }

    /// Delegates an agent reply to the session's mode. May return no calls.
    pub async fn handle_agent_response(
        &self,
        session_id: &str,
        agent_name: &str,
        response: &str,
    ) -> ParleyResult<Vec<AgentCall>> {
        let mode = self.mode_of(session_id).await?;
        let calls = mode.on_agent_response(session_id, agent_name, response)?;
        self.touch(session_id).await;
        Ok(calls)
    }

    pub fn list_modes(&self) -> Vec<ModeInfo> {
        self.registry.list_modes()
    }

    pub async fn current_mode(&self, session_id: &str) -> ParleyResult<(String, ModeConfig)> {
        let sessions = self.sessions.read().await;
        let binding = sessions
            .get(session_id)
            .ok_or_else(|| ParleyError::NotFound(format!("session {}", session_id)))?;
        Ok((binding.mode.name().to_string(), binding.mode_config.clone()))
    }

    /// The full mode triple of a session, for persistence snapshots.
    pub async fn mode_snapshot(
        &self,
        session_id: &str,
    ) -> ParleyResult<(String, ModeConfig, ModeState)> {
        let sessions = self.sessions.read().await;
        let binding = sessions
            .get(session_id)
            .ok_or_else(|| ParleyError::NotFound(format!("session {}", session_id)))?;
        Ok((
            binding.mode.name().to_string(),
            binding.mode_config.clone(),
            binding.mode_state.clone(),
        ))
    }

    /// Resolves a mode through the registry, mapping an unknown name to
    /// `InvalidArgument` (the caller named a mode that does not exist).
    fn resolve_mode(
        &self,
        name: &str,
        config: &ModeConfig,
    ) -> ParleyResult<Arc<dyn CollaborationMode>> {
        match self.registry.get_or_create(name, config) {
            Ok(mode) => Ok(mode),
            Err(ParleyError::NotFound(_)) => Err(ParleyError::InvalidArgument(format!(
                "unknown mode: {}",
                name
            ))),
            Err(e) => Err(e),
        }
    }

    async fn mode_of(&self, session_id: &str) -> ParleyResult<Arc<dyn CollaborationMode>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .map(|b| b.mode.clone())
            .ok_or_else(|| ParleyError::NotFound(format!("session {}", session_id)))
    }

    async fn touch(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(binding) = sessions.get_mut(session_id) {
            let now = Utc::now();
            binding.mode_state.last_update_time = now;
            binding.updated_at = now;
        }
    }
}
