use crate::config::{AgentConfig, ParleyConfig};
use chrono::{DateTime, Utc};
use parley_bus::{pipe_stream, Bus};
use parley_core::{ChatRecord, ParleyError, ParleyResult, TaskMessage};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Idle/busy marker on an [`AgentState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Idle,
    Busy,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
        }
    }
}

/// Last observed state of one agent.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub name: String,
    pub status: AgentStatus,
    pub last_task_id: String,
    pub updated_at: DateTime<Utc>,
}

/// Agent registry and task emission.
///
/// Construction reads every agent's system-prompt file and fails if one is
/// unreadable; a scheduler that came up can always serve prompts.
pub struct Scheduler {
    bus: Arc<dyn Bus>,
    agents: HashMap<String, AgentConfig>,
    system_prompts: HashMap<String, String>,
    states: RwLock<HashMap<String, AgentState>>,
    chat_log: PathBuf,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("agents", &self.agents)
            .field("chat_log", &self.chat_log)
            .finish()
    }
}

impl Scheduler {
    pub async fn new(config: &ParleyConfig, bus: Arc<dyn Bus>) -> ParleyResult<Self> {
        let mut agents = HashMap::new();
        let mut system_prompts = HashMap::new();
        let mut states = HashMap::new();

        for agent in &config.agents {
            let prompt = tokio::fs::read_to_string(&agent.system_prompt_path)
                .await
                .map_err(|e| {
                    ParleyError::Config(format!(
                        "failed to read system prompt for {} ({}): {}",
                        agent.name, agent.system_prompt_path, e
                    ))
                })?;
            info!(agent = %agent.name, pipe = %agent.pipe, "agent registered");
            agents.insert(agent.name.clone(), agent.clone());
            system_prompts.insert(agent.name.clone(), prompt);
            states.insert(
                agent.name.clone(),
                AgentState {
                    name: agent.name.clone(),
                    status: AgentStatus::Idle,
                    last_task_id: String::new(),
                    updated_at: Utc::now(),
                },
            );
        }

        Ok(Self {
            bus,
            agents,
            system_prompts,
            states: RwLock::new(states),
            chat_log: PathBuf::from("chat_history.jsonl"),
        })
    }

    /// Redirects the JSONL chat log (default `chat_history.jsonl`).
    pub fn with_chat_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.chat_log = path.into();
        self
    }

    /// All configured agents, sorted by name.
    pub fn list_agents(&self) -> Vec<&AgentConfig> {
        let mut agents: Vec<&AgentConfig> = self.agents.values().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }

    pub fn agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.get(name)
    }

    pub fn get_system_prompt(&self, name: &str) -> ParleyResult<&str> {
        self.system_prompts
            .get(name)
            .map(|s| s.as_str())
            .ok_or_else(|| ParleyError::NotFound(format!("agent {}", name)))
    }

    pub async fn get_agent_state(&self, name: &str) -> ParleyResult<AgentState> {
        let states = self.states.read().await;
        states
            .get(name)
            .cloned()
            .ok_or_else(|| ParleyError::NotFound(format!("agent {}", name)))
    }

    pub async fn update_agent_state(
        &self,
        name: &str,
        status: AgentStatus,
        last_task_id: &str,
    ) -> ParleyResult<()> {
        let mut states = self.states.write().await;
        let state = states
            .get_mut(name)
            .ok_or_else(|| ParleyError::NotFound(format!("agent {}", name)))?;
        state.status = status;
        state.last_task_id = last_task_id.to_string();
        state.updated_at = Utc::now();
        Ok(())
    }

    /// Emits a task onto the target agent's job stream and returns the task
    /// id. The chat-log append is best-effort: its failure never fails the
    /// send.
    pub async fn send_task(
        &self,
        target: &str,
        content: &str,
        session_id: Option<String>,
        from: &str,
    ) -> ParleyResult<String> {
        let agent = self
            .agents
            .get(target)
            .ok_or_else(|| ParleyError::NotFound(format!("agent {}", target)))?;

        let task = TaskMessage::new(target, content, session_id);
        let payload = serde_json::to_string(&task)?;
        let stream = pipe_stream(&agent.pipe);
        self.bus.append(&stream, &[("task", &payload)]).await?;
        debug!(task_id = %task.task_id, stream = %stream, from = %from, "task emitted");

        if let Err(e) = self.log_chat(from, target, content).await {
            warn!(error = %e, "chat log append failed");
        }

        Ok(task.task_id)
    }

    async fn log_chat(&self, from: &str, to: &str, content: &str) -> ParleyResult<()> {
        let record = ChatRecord {
            timestamp: Utc::now(),
            from: from.to_string(),
            to: to.to_string(),
            content: content.to_string(),
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.chat_log)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }
}
