use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Lifecycle of a [`TaskMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A unit of work on the bus. Serialized as JSON into the single `task`
/// field of a stream entry, both on the per-agent job streams and on the
/// result stream back to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: String,
    pub agent_name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub status: TaskStatus,
}

impl TaskMessage {
    pub fn new(
        agent_name: impl Into<String>,
        content: impl Into<String>,
        session_id: Option<String>,
    ) -> Self {
        let agent_name = agent_name.into();
        Self {
            task_id: next_task_id(&agent_name),
            agent_name,
            content: content.into(),
            result: None,
            session_id,
            retry_count: 0,
            max_retries: 3,
            created_at: Utc::now(),
            status: TaskStatus::Pending,
        }
    }
}

/// One line of the on-disk JSONL chat log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    pub timestamp: DateTime<Utc>,
    pub from: String,
    pub to: String,
    pub content: String,
}

static LAST_TASK_NANOS: AtomicI64 = AtomicI64::new(0);

/// Generates `task_<agent>_<nanos>`, strictly monotonic within the process
/// even when the system clock stalls or steps backwards.
pub fn next_task_id(agent_name: &str) -> String {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
    let prev = LAST_TASK_NANOS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
            Some(now.max(prev + 1))
        })
        .unwrap_or(now);
    format!("task_{}_{}", agent_name, now.max(prev + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_ids_are_monotonic() {
        let a = next_task_id("花花");
        let b = next_task_id("花花");
        let nanos = |id: &str| id.rsplit('_').next().unwrap().parse::<i64>().unwrap();
        assert!(nanos(&b) > nanos(&a));
        assert!(a.starts_with("task_花花_"));
    }

    #[test]
    fn test_task_message_defaults() {
        let task = TaskMessage::new("薇薇", "review this", Some("sess_abc12345".into()));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.max_retries, 3);
        assert!(task.result.is_none());
    }

    #[test]
    fn test_task_message_wire_format() {
        let task = TaskMessage::new("花花", "hi", None);
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["agent_name"], "花花");
        assert_eq!(json["status"], "pending");
        // Optional fields are omitted entirely when unset.
        assert!(json.get("result").is_none());
        assert!(json.get("session_id").is_none());
    }

    #[test]
    fn test_task_message_round_trip_with_result() {
        let mut task = TaskMessage::new("花花", "hi", Some("sess_00000001".into()));
        task.result = Some("hello".into());
        task.status = TaskStatus::Completed;
        let json = serde_json::to_string(&task).unwrap();
        let back: TaskMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.result.as_deref(), Some("hello"));
        assert_eq!(back.status, TaskStatus::Completed);
        assert_eq!(back.task_id, task.task_id);
    }
}
