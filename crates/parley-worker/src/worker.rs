use crate::exec::{build_prompt, extract_reply, extract_resume_token, run_agent_cli};
use parley_bus::{agent_group, pipe_stream, resume_token_key, Bus, StreamEntry, RESULTS_STREAM};
use parley_core::{ParleyResult, TaskMessage, TaskStatus};
use parley_scheduler::AgentConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const READ_BLOCK: Duration = Duration::from_secs(1);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);
/// How long an entry must sit unacknowledged before another consumer may
/// claim it. Long enough that a live worker mid-CLI-call usually keeps its
/// entry; at-least-once delivery covers the rest.
const RECLAIM_MIN_IDLE: Duration = Duration::from_secs(60);

/// Consumer of one agent's job stream.
///
/// Construction pings the bus and creates the consumer group; a worker that
/// came up can read. The drain loop is single-threaded and cooperative:
/// one entry at a time, acknowledged only after its effects are durable.
/// Each iteration first claims entries a crashed consumer read but never
/// acknowledged — the group's `>` cursor alone would leave them stuck.
pub struct AgentWorker {
    config: AgentConfig,
    system_prompt: String,
    bus: Arc<dyn Bus>,
    stream: String,
    group: String,
    consumer: String,
    reclaim_min_idle: Duration,
}

impl AgentWorker {
    pub async fn new(
        config: AgentConfig,
        system_prompt: String,
        bus: Arc<dyn Bus>,
    ) -> ParleyResult<Self> {
        bus.ping().await?;

        let stream = pipe_stream(&config.pipe);
        let group = agent_group(&config.name);
        let consumer = format!("consumer:{}:{}", config.name, std::process::id());
        bus.create_group(&stream, &group, "0").await?;

        Ok(Self {
            config,
            system_prompt,
            bus,
            stream,
            group,
            consumer,
            reclaim_min_idle: RECLAIM_MIN_IDLE,
        })
    }

    /// Lowers the idle threshold before this worker adopts another
    /// consumer's unacknowledged work.
    pub fn with_reclaim_min_idle(mut self, min_idle: Duration) -> Self {
        self.reclaim_min_idle = min_idle;
        self
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer
    }

    /// Drains the job stream until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> ParleyResult<()> {
        info!(
            agent = %self.config.name,
            stream = %self.stream,
            group = %self.group,
            consumer = %self.consumer,
            "worker started"
        );

        loop {
            if self.reclaim(&cancel).await {
                return Ok(());
            }

            let entries = tokio::select! {
                _ = cancel.cancelled() => break,
                read = self.bus.read_group(&self.stream, &self.group, &self.consumer, 1, READ_BLOCK) => {
                    match read {
                        Ok(entries) => entries,
                        Err(e) => {
                            error!(agent = %self.config.name, error = %e, "bus read failed");
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(ERROR_BACKOFF) => continue,
                            }
                        }
                    }
                }
            };

            for entry in entries {
                if cancel.is_cancelled() {
                    // Leave the entry pending; a reclaim pass adopts it.
                    return Ok(());
                }
                if let Err(e) = self.process_entry(&entry, &cancel).await {
                    error!(agent = %self.config.name, entry_id = %entry.id, error = %e, "entry processing failed");
                }
            }
        }

        info!(agent = %self.config.name, "worker stopped");
        Ok(())
    }

    /// Adopts entries a dead consumer read but never acknowledged and runs
    /// them through the normal execute/ack path. Returns true when cancelled
    /// mid-drain.
    async fn reclaim(&self, cancel: &CancellationToken) -> bool {
        loop {
            let claimed = match self
                .bus
                .claim_stale(
                    &self.stream,
                    &self.group,
                    &self.consumer,
                    self.reclaim_min_idle,
                    1,
                )
                .await
            {
                Ok(claimed) => claimed,
                Err(e) => {
                    warn!(agent = %self.config.name, error = %e, "pending reclaim failed");
                    return false;
                }
            };
            if claimed.is_empty() {
                return false;
            }
            for entry in claimed {
                if cancel.is_cancelled() {
                    return true;
                }
                info!(agent = %self.config.name, entry_id = %entry.id, "reclaimed pending entry");
                if let Err(e) = self.process_entry(&entry, cancel).await {
                    error!(agent = %self.config.name, entry_id = %entry.id, error = %e, "reclaimed entry failed");
                }
            }
        }
    }

    async fn process_entry(
        &self,
        entry: &StreamEntry,
        cancel: &CancellationToken,
    ) -> ParleyResult<()> {
        let mut task = match entry
            .field("task")
            .and_then(|raw| serde_json::from_str::<TaskMessage>(raw).ok())
        {
            Some(task) => task,
            None => {
                // Poison message: quarantine by acking, never retry.
                warn!(agent = %self.config.name, entry_id = %entry.id, "malformed task entry, acknowledging");
                return self.bus.ack(&self.stream, &self.group, &entry.id).await;
            }
        };

        info!(agent = %self.config.name, task_id = %task.task_id, "task received");
        task.status = TaskStatus::Processing;

        let start = std::time::Instant::now();
        match self.execute(&task, cancel).await {
            Ok(Some(reply)) => {
                info!(
                    agent = %self.config.name,
                    task_id = %task.task_id,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "task completed"
                );
                self.emit_result(task, reply).await?;
                self.bus.ack(&self.stream, &self.group, &entry.id).await
            }
            Ok(None) => {
                // Cancelled mid-execution. No ack: the entry stays pending
                // until a worker's reclaim pass adopts it.
                Ok(())
            }
            Err(e) => {
                error!(
                    agent = %self.config.name,
                    task_id = %task.task_id,
                    status = "failed",
                    error = %e,
                    "task execution failed"
                );
                self.retry(task).await?;
                self.bus.ack(&self.stream, &self.group, &entry.id).await
            }
        }
    }

    /// Runs the CLI for one task. `Ok(None)` means cancelled.
    async fn execute(
        &self,
        task: &TaskMessage,
        cancel: &CancellationToken,
    ) -> ParleyResult<Option<String>> {
        let token_key = task
            .session_id
            .as_ref()
            .map(|sid| resume_token_key(sid, &self.config.name));

        let existing_token = match &token_key {
            Some(key) => self.bus.kv_get(key).await?,
            None => None,
        };

        let prompt = build_prompt(&self.system_prompt, &task.content);
        let output = match run_agent_cli(
            &self.config.exec_cmd,
            existing_token.as_deref(),
            &prompt,
            cancel,
        )
        .await?
        {
            Some(output) => output,
            None => return Ok(None),
        };

        // A fresh conversation announces its token on stdout; remember it so
        // the next task in this session resumes the same CLI-side
        // conversation.
        if existing_token.is_none() {
            if let (Some(key), Some(token)) = (&token_key, extract_resume_token(&output.stdout)) {
                match self.bus.kv_set(key, &token).await {
                    Ok(()) => info!(agent = %self.config.name, key = %key, "resume token stored"),
                    Err(e) => warn!(agent = %self.config.name, error = %e, "failed to store resume token"),
                }
            }
        }

        Ok(Some(extract_reply(&output.stderr)))
    }

    /// Publishes the reply on the result stream. One-shot tasks (no session)
    /// produce no result entry.
    async fn emit_result(&self, mut task: TaskMessage, reply: String) -> ParleyResult<()> {
        if task.session_id.is_none() {
            debug!(agent = %self.config.name, task_id = %task.task_id, "no session, skipping result emit");
            return Ok(());
        }
        task.result = Some(reply);
        task.status = TaskStatus::Completed;
        let payload = serde_json::to_string(&task)?;
        self.bus
            .append(RESULTS_STREAM, &[("task", &payload)])
            .await?;
        Ok(())
    }

    /// Bounded retry: re-append the task (same id, bumped counter) onto its
    /// own stream while attempts remain, otherwise drop it.
    async fn retry(&self, mut task: TaskMessage) -> ParleyResult<()> {
        if task.retry_count >= task.max_retries {
            error!(
                agent = %self.config.name,
                task_id = %task.task_id,
                retries = task.retry_count,
                "retry budget exhausted, dropping task"
            );
            return Ok(());
        }
        task.retry_count += 1;
        task.status = TaskStatus::Pending;
        warn!(
            agent = %self.config.name,
            task_id = %task.task_id,
            attempt = task.retry_count,
            "re-queueing failed task"
        );
        let payload = serde_json::to_string(&task)?;
        self.bus.append(&self.stream, &[("task", &payload)]).await?;
        Ok(())
    }
}
