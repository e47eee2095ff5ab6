//! Durable message bus abstraction for Parley.
//!
//! The orchestrator and the agent workers never talk to Redis directly; they
//! go through the [`Bus`] trait, which models the substrate the system needs:
//! append-only streams with consumer groups, a key/value store, and sets.
//!
//! # Main types
//!
//! - [`Bus`] — The substrate contract.
//! - [`RedisBus`] — Production implementation over Redis streams.
//! - [`MemoryBus`] — In-process implementation honouring the same contract,
//!   used by the test suites.

/// In-process bus for tests.
pub mod memory;
/// Redis-backed bus.
pub mod redis_bus;

pub use memory::MemoryBus;
pub use redis_bus::RedisBus;

use async_trait::async_trait;
use parley_core::ParleyResult;
use std::collections::HashMap;
use std::time::Duration;

/// Stream carrying agent replies back to the orchestrator.
pub const RESULTS_STREAM: &str = "results:stream";

/// Set of live session ids.
pub const SESSION_LIST_KEY: &str = "sessions:list";

/// Stream of jobs inbound to one agent queue.
pub fn pipe_stream(queue: &str) -> String {
    format!("pipe:{}", queue)
}

/// KV key of a session snapshot.
pub fn session_key(session_id: &str) -> String {
    format!("session:{}", session_id)
}

/// KV key of the resume-token mapping for `(session, agent)`.
pub fn resume_token_key(session_id: &str, agent_name: &str) -> String {
    format!("session_mapping:{}:{}", session_id, agent_name)
}

/// Consumer group of one agent's job stream.
pub fn agent_group(agent_name: &str) -> String {
    format!("group:{}", agent_name)
}

/// One entry read from a stream.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl StreamEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|s| s.as_str())
    }
}

/// An entry delivered to a group but not yet acknowledged.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub id: String,
    pub consumer: String,
    pub delivery_count: u64,
}

/// The durable substrate the core depends on: append-only streams with
/// consumer-group semantics plus a small KV/set store.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Connection liveness probe.
    async fn ping(&self) -> ParleyResult<()>;

    /// Appends an entry; returns its id.
    async fn append(&self, stream: &str, fields: &[(&str, &str)]) -> ParleyResult<String>;

    /// Creates a consumer group starting at `start` (`"0"` for the full
    /// backlog). Idempotent: an already-existing group is success.
    async fn create_group(&self, stream: &str, group: &str, start: &str) -> ParleyResult<()>;

    /// Reads up to `count` new entries (`>` semantics) for `consumer` in
    /// `group`, blocking up to `block`. An empty Vec means the block timed
    /// out with nothing to deliver.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> ParleyResult<Vec<StreamEntry>>;

    /// Acknowledges one entry on a group.
    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> ParleyResult<()>;

    /// Lists entries delivered to the group but not yet acknowledged.
    async fn pending(&self, stream: &str, group: &str) -> ParleyResult<Vec<PendingEntry>>;

    /// Claims up to `count` entries that have been pending longer than
    /// `min_idle`, reassigning them to `consumer` and returning their
    /// contents. This is the crash-recovery path: `read_group`'s `>` cursor
    /// never revisits a delivered entry, so work that a dead consumer read
    /// but never acknowledged comes back only through a claim.
    async fn claim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> ParleyResult<Vec<StreamEntry>>;

    /// Deletes a stream and all its groups.
    async fn delete_stream(&self, stream: &str) -> ParleyResult<()>;

    async fn kv_set(&self, key: &str, value: &str) -> ParleyResult<()>;
    async fn kv_get(&self, key: &str) -> ParleyResult<Option<String>>;
    async fn kv_del(&self, key: &str) -> ParleyResult<()>;

    async fn set_add(&self, key: &str, member: &str) -> ParleyResult<()>;
    async fn set_remove(&self, key: &str, member: &str) -> ParleyResult<()>;
    async fn set_members(&self, key: &str) -> ParleyResult<Vec<String>>;
}
