use crate::hub::{PushHub, EVENT_HISTORY, EVENT_MESSAGE};
use crate::persistence::SessionStore;
use crate::state::{SessionData, SessionState, SessionSummary};
use parley_bus::{Bus, RESULTS_STREAM};
use parley_core::{
    catalog, CallHistoryItem, Cat, Message, MessageKind, ParleyError, ParleyResult, Sender,
    TaskMessage, USER_ID, USER_NAME,
};
use parley_modes::{AgentCall, ModeConfig, ModeInfo};
use parley_orchestrator::Orchestrator;
use parley_scheduler::{AgentStatus, Scheduler};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Consumer group through which the server drains the result stream.
const RESULT_GROUP: &str = "api-server";
const READ_BLOCK: Duration = Duration::from_secs(1);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);
/// Idle threshold before a restarted server claims result entries a dead
/// instance read but never acknowledged.
const RECLAIM_MIN_IDLE: Duration = Duration::from_secs(60);

/// Message totals of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStats {
    pub total_messages: usize,
    pub cat_messages: usize,
}

/// Owner of all in-memory session state.
///
/// The top-level map lock is held only to find or insert a session; every
/// mutation happens under that session's own lock, which is never held
/// across bus appends (dispatch runs on detached tasks) or child execution.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<RwLock<SessionState>>>>,
    bus: Arc<dyn Bus>,
    orchestrator: Arc<Orchestrator>,
    scheduler: Arc<Scheduler>,
    store: SessionStore,
    hub: Arc<PushHub>,
    user_avatar: String,
}

fn json_of<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

impl SessionManager {
    pub fn new(
        bus: Arc<dyn Bus>,
        orchestrator: Arc<Orchestrator>,
        scheduler: Arc<Scheduler>,
        hub: Arc<PushHub>,
        user_avatar: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            store: SessionStore::new(bus.clone()),
            bus,
            orchestrator,
            scheduler,
            hub,
            user_avatar: user_avatar.into(),
        })
    }

    pub fn hub(&self) -> &Arc<PushHub> {
        &self.hub
    }

    /// Restores every persisted session. Returns how many came back.
    pub async fn load_all(&self) -> ParleyResult<usize> {
        let mut restored = 0;
        for data in self.store.load_all().await? {
            let id = data.id.clone();
            if let Err(e) = self
                .orchestrator
                .restore_session(
                    &id,
                    &data.mode_name,
                    data.mode_config.clone(),
                    data.mode_state.clone(),
                )
                .await
            {
                error!(session_id = %id, error = %e, "failed to restore mode binding");
                continue;
            }
            let state = Arc::new(RwLock::new(data.into_state()));
            self.sessions.write().await.insert(id, state);
            restored += 1;
        }
        Ok(restored)
    }

    pub async fn create_session(
        &self,
        mode_name: Option<String>,
        mode_config: Option<ModeConfig>,
    ) -> ParleyResult<SessionSummary> {
        let id = parley_core::short_id("sess");
        self.orchestrator
            .create_session(&id, mode_name.as_deref(), mode_config)
            .await?;

        let mut state = SessionState::new(&id);
        state.push_message(Message::system("会话已创建，猫猫们已就位！", &id));
        let summary = state.summary_view();

        let session = Arc::new(RwLock::new(state));
        self.sessions
            .write()
            .await
            .insert(id.clone(), session.clone());
        info!(session_id = %id, "session created");

        self.snapshot_detached(session);
        Ok(summary)
    }

    pub async fn get_session(&self, session_id: &str) -> ParleyResult<SessionSummary> {
        let session = self.session(session_id).await?;
        let state = session.read().await;
        Ok(state.summary_view())
    }

    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let sessions: Vec<Arc<RwLock<SessionState>>> =
            self.sessions.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(sessions.len());
        for session in sessions {
            summaries.push(session.read().await.summary_view());
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }

    /// Removes the session everywhere: in-memory map, mode binding,
    /// persisted snapshot and live-set membership.
    pub async fn delete_session(&self, session_id: &str) -> ParleyResult<()> {
        self.sessions
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| ParleyError::NotFound(format!("session {}", session_id)))?;
        if let Err(e) = self.orchestrator.delete_session(session_id).await {
            warn!(session_id = %session_id, error = %e, "mode binding already gone");
        }
        self.store.delete(session_id).await?;
        info!(session_id = %session_id, "session deleted");
        Ok(())
    }

    pub async fn get_messages(&self, session_id: &str) -> ParleyResult<Vec<Message>> {
        let session = self.session(session_id).await?;
        let state = session.read().await;
        Ok(state.messages.clone())
    }

    pub async fn get_stats(&self, session_id: &str) -> ParleyResult<MessageStats> {
        let session = self.session(session_id).await?;
        let state = session.read().await;
        Ok(MessageStats {
            total_messages: state.messages.len(),
            cat_messages: state
                .messages
                .iter()
                .filter(|m| m.kind == MessageKind::Agent)
                .count(),
        })
    }

    pub async fn get_call_history(&self, session_id: &str) -> ParleyResult<Vec<CallHistoryItem>> {
        let session = self.session(session_id).await?;
        let state = session.read().await;
        Ok(state.call_history.clone())
    }

    pub fn list_modes(&self) -> Vec<ModeInfo> {
        self.orchestrator.list_modes()
    }

    pub async fn current_mode(&self, session_id: &str) -> ParleyResult<(String, ModeConfig)> {
        self.session(session_id).await?;
        self.orchestrator.current_mode(session_id).await
    }

    pub async fn switch_mode(
        &self,
        session_id: &str,
        mode_name: &str,
        mode_config: Option<ModeConfig>,
    ) -> ParleyResult<()> {
        let session = self.session(session_id).await?;
        self.orchestrator
            .switch_mode(session_id, mode_name, mode_config)
            .await?;
        self.snapshot_detached(session);
        Ok(())
    }

    /// Ingress of one user message: append + push, resolve mentions, let the
    /// mode decide the calls, then record and dispatch each call.
    pub async fn send_message(
        &self,
        session_id: &str,
        content: &str,
        mentioned_cats: &[String],
    ) -> ParleyResult<Message> {
        let session = self.session(session_id).await?;
        let mut state = session.write().await;

        let user_msg = Message::user(content, session_id, self.user_sender());
        state.push_message(user_msg.clone());
        self.hub
            .broadcast(session_id, EVENT_MESSAGE, json_of(&user_msg))
            .await;
        state.maybe_set_summary(content);

        let mut mentioned = Vec::with_capacity(mentioned_cats.len());
        for cat_id in mentioned_cats {
            match catalog::cat_name_for_id(cat_id) {
                Some(name) => mentioned.push(name.to_string()),
                None => warn!(cat_id = %cat_id, "unknown cat id in mention, skipping"),
            }
        }

        let calls = self
            .orchestrator
            .handle_user_message(session_id, content, &mentioned)
            .await?;
        self.apply_calls(&mut state, &calls).await;

        drop(state);
        self.snapshot_detached(session);
        Ok(user_msg)
    }

    /// Runs the result-stream consumer until cancelled.
    pub fn start_result_listener(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.result_loop(cancel).await })
    }

    async fn result_loop(&self, cancel: CancellationToken) {
        let consumer = format!("consumer-{}", std::process::id());
        if let Err(e) = self.bus.create_group(RESULTS_STREAM, RESULT_GROUP, "0").await {
            error!(error = %e, "failed to create result consumer group");
        }
        info!(consumer = %consumer, "result listener started");

        loop {
            // Adopt result entries a dead server instance read but never
            // acknowledged; the `>` cursor alone would skip them forever.
            match self
                .bus
                .claim_stale(RESULTS_STREAM, RESULT_GROUP, &consumer, RECLAIM_MIN_IDLE, 1)
                .await
            {
                Ok(reclaimed) => {
                    for entry in reclaimed {
                        info!(entry_id = %entry.id, "reclaimed pending result entry");
                        self.consume_result_entry(&entry).await;
                    }
                }
                Err(e) => warn!(error = %e, "result reclaim failed"),
            }

            let entries = tokio::select! {
                _ = cancel.cancelled() => break,
                read = self.bus.read_group(RESULTS_STREAM, RESULT_GROUP, &consumer, 1, READ_BLOCK) => {
                    match read {
                        Ok(entries) => entries,
                        Err(e) => {
                            error!(error = %e, "result stream read failed");
                            // The group may not exist yet if the bus was
                            // reset underneath us.
                            let _ = self.bus.create_group(RESULTS_STREAM, RESULT_GROUP, "0").await;
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(ERROR_BACKOFF) => continue,
                            }
                        }
                    }
                }
            };

            for entry in entries {
                self.consume_result_entry(&entry).await;
            }
        }
        info!("result listener stopped");
    }

    /// Processes one result entry and acknowledges it. Malformed results and
    /// orphan replies are logged and acked: they can never become
    /// processable.
    async fn consume_result_entry(&self, entry: &parley_bus::StreamEntry) {
        if let Err(e) = self.handle_result_fields(&entry.fields).await {
            error!(entry_id = %entry.id, error = %e, "result entry discarded");
        }
        if let Err(e) = self.bus.ack(RESULTS_STREAM, RESULT_GROUP, &entry.id).await {
            error!(entry_id = %entry.id, error = %e, "result ack failed");
        }
    }

    async fn handle_result_fields(
        &self,
        fields: &HashMap<String, String>,
    ) -> ParleyResult<()> {
        let raw = fields
            .get("task")
            .ok_or_else(|| ParleyError::InvalidArgument("result entry without task field".into()))?;
        let task: TaskMessage = serde_json::from_str(raw)
            .map_err(|e| ParleyError::InvalidArgument(format!("malformed result task: {}", e)))?;
        let session_id = task
            .session_id
            .clone()
            .ok_or_else(|| ParleyError::InvalidArgument("result task without session id".into()))?;

        let session = self.session(&session_id).await?;
        let text = task.result.clone().unwrap_or_default();
        info!(session_id = %session_id, agent = %task.agent_name, "agent reply received");

        let mut state = session.write().await;
        let reply = Message::agent(&text, &session_id, self.cat_sender(&task.agent_name));
        state.push_message(reply.clone());
        self.hub
            .broadcast(&session_id, EVENT_MESSAGE, json_of(&reply))
            .await;

        if state.fill_call_response(&task.agent_name, &text) {
            self.hub
                .broadcast(&session_id, EVENT_HISTORY, json_of(&state.call_history))
                .await;
        } else {
            warn!(session_id = %session_id, agent = %task.agent_name, "reply without an open call-history item");
        }

        if let Err(e) = self
            .scheduler
            .update_agent_state(&task.agent_name, AgentStatus::Idle, &task.task_id)
            .await
        {
            warn!(agent = %task.agent_name, error = %e, "agent state update failed");
        }

        let calls = self
            .orchestrator
            .handle_agent_response(&session_id, &task.agent_name, &text)
            .await?;
        self.apply_calls(&mut state, &calls).await;

        drop(state);
        self.snapshot_detached(session);
        Ok(())
    }

    /// Records and dispatches the calls a mode returned: join notice (once
    /// per agent per session), call-history entry, then task emission on a
    /// detached task so the session lock is not held across the bus append.
    async fn apply_calls(&self, state: &mut SessionState, calls: &[AgentCall]) {
        for call in calls {
            if self.scheduler.agent(&call.agent_name).is_none() {
                warn!(agent = %call.agent_name, "call targets unknown agent, skipping");
                continue;
            }
            let session_id = state.id.clone();

            if state.joined_cats.insert(call.agent_name.clone()) {
                let notice =
                    Message::system(format!("{} 已加入对话", call.agent_name), &session_id);
                state.push_message(notice.clone());
                self.hub
                    .broadcast(&session_id, EVENT_MESSAGE, json_of(&notice))
                    .await;
            }

            let cat_id = catalog::cat_id_for_name(&call.agent_name).unwrap_or("cat_unknown");
            state.call_history.push(CallHistoryItem::new(
                cat_id,
                &call.agent_name,
                &session_id,
                &call.prompt,
            ));
            self.hub
                .broadcast(&session_id, EVENT_HISTORY, json_of(&state.call_history))
                .await;

            let scheduler = self.scheduler.clone();
            let target = call.agent_name.clone();
            let prompt = call.prompt.clone();
            let caller = call.caller_name.clone();
            tokio::spawn(async move {
                match scheduler
                    .send_task(&target, &prompt, Some(session_id), &caller)
                    .await
                {
                    Ok(task_id) => {
                        let _ = scheduler
                            .update_agent_state(&target, AgentStatus::Busy, &task_id)
                            .await;
                    }
                    Err(e) => error!(agent = %target, error = %e, "task dispatch failed"),
                }
            });
        }
    }

    /// The agent catalogue as served to clients, with live idle/busy status.
    pub async fn cats(&self) -> Vec<Cat> {
        let mut cats = Vec::new();
        for agent in self.scheduler.list_agents() {
            let status = match self.scheduler.get_agent_state(&agent.name).await {
                Ok(state) => state.status.as_str().to_string(),
                Err(_) => "offline".to_string(),
            };
            cats.push(Cat {
                id: catalog::cat_id_for_name(&agent.name)
                    .unwrap_or("cat_unknown")
                    .to_string(),
                name: agent.name.clone(),
                avatar: agent.avatar.clone(),
                color: catalog::cat_color_for_name(&agent.name)
                    .unwrap_or_default()
                    .to_string(),
                status,
            });
        }
        cats
    }

    pub async fn cat(&self, cat_id: &str) -> ParleyResult<Cat> {
        self.cats()
            .await
            .into_iter()
            .find(|c| c.id == cat_id)
            .ok_or_else(|| ParleyError::NotFound(format!("cat {}", cat_id)))
    }

    pub async fn available_cats(&self) -> Vec<Cat> {
        self.cats()
            .await
            .into_iter()
            .filter(|c| c.status == "idle")
            .collect()
    }

    async fn session(&self, session_id: &str) -> ParleyResult<Arc<RwLock<SessionState>>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| ParleyError::NotFound(format!("session {}", session_id)))
    }

    fn user_sender(&self) -> Sender {
        Sender {
            id: USER_ID.to_string(),
            name: USER_NAME.to_string(),
            avatar: self.user_avatar.clone(),
            color: None,
        }
    }

    fn cat_sender(&self, agent_name: &str) -> Sender {
        Sender {
            id: catalog::cat_id_for_name(agent_name)
                .unwrap_or("cat_unknown")
                .to_string(),
            name: agent_name.to_string(),
            avatar: self
                .scheduler
                .agent(agent_name)
                .map(|a| a.avatar.clone())
                .unwrap_or_default(),
            color: catalog::cat_color_for_name(agent_name).map(|c| c.to_string()),
        }
    }

    /// Writes the session's snapshot immediately. The shutdown path uses
    /// this to flush in-flight state; regular mutations go through
    /// [`Self::snapshot_detached`].
    pub async fn snapshot_now(&self, session_id: &str) -> ParleyResult<()> {
        let session = self.session(session_id).await?;
        let state = session.read().await.clone();
        let (mode_name, mode_config, mode_state) =
            self.orchestrator.mode_snapshot(session_id).await?;
        self.store
            .save(&SessionData::from_state(&state, mode_name, mode_config, mode_state))
            .await
    }

    /// Flushes every live session's snapshot.
    pub async fn flush_all(&self) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.snapshot_now(&id).await {
                warn!(session_id = %id, error = %e, "shutdown flush failed");
            }
        }
    }

    /// Fire-and-forget snapshot of the session's current state. Persistence
    /// failures are logged and never block the user flow.
    fn snapshot_detached(&self, session: Arc<RwLock<SessionState>>) {
        let store = self.store.clone();
        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            let state = session.read().await.clone();
            match orchestrator.mode_snapshot(&state.id).await {
                Ok((mode_name, mode_config, mode_state)) => {
                    let data =
                        SessionData::from_state(&state, mode_name, mode_config, mode_state);
                    if let Err(e) = store.save(&data).await {
                        warn!(session_id = %data.id, error = %e, "session snapshot failed");
                    }
                }
                Err(e) => warn!(session_id = %state.id, error = %e, "mode snapshot unavailable"),
            }
        });
    }
}
