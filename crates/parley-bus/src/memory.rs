use crate::{Bus, PendingEntry, StreamEntry};
use async_trait::async_trait;
use parley_core::{ParleyError, ParleyResult};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

#[derive(Default)]
struct StreamState {
    entries: Vec<(String, HashMap<String, String>)>,
    next_seq: u64,
    groups: HashMap<String, GroupState>,
}

struct PendingRecord {
    id: String,
    consumer: String,
    delivery_count: u64,
    delivered_at: std::time::Instant,
}

#[derive(Default)]
struct GroupState {
    cursor: usize,
    pending: Vec<PendingRecord>,
}

#[derive(Default)]
struct MemoryState {
    streams: HashMap<String, StreamState>,
    kv: HashMap<String, String>,
    sets: HashMap<String, BTreeSet<String>>,
}

/// In-process [`Bus`] with the same observable contract as [`crate::RedisBus`]:
/// group reads deliver each entry once, unacknowledged entries stay on the
/// pending list until acked or claimed by another consumer, blocking reads
/// wait for a new append up to the deadline.
#[derive(Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<MemoryState>>,
    appended: Arc<Notify>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries of a stream, newest last. Test inspection helper.
    pub async fn entries(&self, stream: &str) -> Vec<StreamEntry> {
        let state = self.state.lock().await;
        state
            .streams
            .get(stream)
            .map(|s| {
                s.entries
                    .iter()
                    .map(|(id, fields)| StreamEntry {
                        id: id.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn ping(&self) -> ParleyResult<()> {
        Ok(())
    }

    async fn append(&self, stream: &str, fields: &[(&str, &str)]) -> ParleyResult<String> {
        let mut state = self.state.lock().await;
        let stream = state.streams.entry(stream.to_string()).or_default();
        stream.next_seq += 1;
        let id = format!("{}-0", stream.next_seq);
        let fields = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        stream.entries.push((id.clone(), fields));
        drop(state);
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn create_group(&self, stream: &str, group: &str, start: &str) -> ParleyResult<()> {
        let mut state = self.state.lock().await;
        let stream = state.streams.entry(stream.to_string()).or_default();
        let cursor = match start {
            "$" => stream.entries.len(),
            _ => 0,
        };
        stream
            .groups
            .entry(group.to_string())
            .or_insert_with(|| GroupState {
                cursor,
                pending: Vec::new(),
            });
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> ParleyResult<Vec<StreamEntry>> {
        let deadline = Instant::now() + block;
        loop {
            {
                let mut state = self.state.lock().await;
                let stream_state = state
                    .streams
                    .get_mut(stream)
                    .ok_or_else(|| ParleyError::Bus(format!("no such stream: {}", stream)))?;
                let total = stream_state.entries.len();
                let group_state = stream_state
                    .groups
                    .get_mut(group)
                    .ok_or_else(|| ParleyError::Bus(format!("no such group: {}", group)))?;

                if group_state.cursor < total {
                    let take = count.min(total - group_state.cursor);
                    let mut out = Vec::with_capacity(take);
                    for (id, fields) in stream_state
                        .entries
                        .iter()
                        .skip(group_state.cursor)
                        .take(take)
                    {
                        group_state.pending.push(PendingRecord {
                            id: id.clone(),
                            consumer: consumer.to_string(),
                            delivery_count: 1,
                            delivered_at: std::time::Instant::now(),
                        });
                        out.push(StreamEntry {
                            id: id.clone(),
                            fields: fields.clone(),
                        });
                    }
                    group_state.cursor += take;
                    return Ok(out);
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }
            let notified = self.appended.notified();
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> ParleyResult<()> {
        let mut state = self.state.lock().await;
        if let Some(stream) = state.streams.get_mut(stream) {
            if let Some(group) = stream.groups.get_mut(group) {
                group.pending.retain(|p| p.id != entry_id);
            }
        }
        Ok(())
    }

    async fn pending(&self, stream: &str, group: &str) -> ParleyResult<Vec<PendingEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| {
                g.pending
                    .iter()
                    .map(|p| PendingEntry {
                        id: p.id.clone(),
                        consumer: p.consumer.clone(),
                        delivery_count: p.delivery_count,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn claim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> ParleyResult<Vec<StreamEntry>> {
        let mut state = self.state.lock().await;
        let Some(stream_state) = state.streams.get_mut(stream) else {
            return Ok(Vec::new());
        };

        let mut claimed_ids = Vec::new();
        if let Some(group_state) = stream_state.groups.get_mut(group) {
            for record in group_state.pending.iter_mut() {
                if claimed_ids.len() >= count {
                    break;
                }
                if record.delivered_at.elapsed() >= min_idle {
                    record.consumer = consumer.to_string();
                    record.delivery_count += 1;
                    record.delivered_at = std::time::Instant::now();
                    claimed_ids.push(record.id.clone());
                }
            }
        }

        Ok(claimed_ids
            .iter()
            .filter_map(|id| {
                stream_state
                    .entries
                    .iter()
                    .find(|(entry_id, _)| entry_id == id)
                    .map(|(entry_id, fields)| StreamEntry {
                        id: entry_id.clone(),
                        fields: fields.clone(),
                    })
            })
            .collect())
    }

    async fn delete_stream(&self, stream: &str) -> ParleyResult<()> {
        let mut state = self.state.lock().await;
        state.streams.remove(stream);
        Ok(())
    }

    async fn kv_set(&self, key: &str, value: &str) -> ParleyResult<()> {
        let mut state = self.state.lock().await;
        state.kv.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn kv_get(&self, key: &str) -> ParleyResult<Option<String>> {
        let state = self.state.lock().await;
        Ok(state.kv.get(key).cloned())
    }

    async fn kv_del(&self, key: &str) -> ParleyResult<()> {
        let mut state = self.state.lock().await;
        state.kv.remove(key);
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> ParleyResult<()> {
        let mut state = self.state.lock().await;
        state
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> ParleyResult<()> {
        let mut state = self.state.lock().await;
        if let Some(set) = state.sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> ParleyResult<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_read_ack_cycle() {
        let bus = MemoryBus::new();
        bus.create_group("pipe:pipe_huahua", "group:花花", "0")
            .await
            .unwrap();
        bus.append("pipe:pipe_huahua", &[("task", "{}")])
            .await
            .unwrap();

        let entries = bus
            .read_group(
                "pipe:pipe_huahua",
                "group:花花",
                "consumer:花花:1",
                1,
                Duration::from_millis(10),
            )
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].field("task"), Some("{}"));

        // The entry is pending until acked.
        let pending = bus.pending("pipe:pipe_huahua", "group:花花").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].consumer, "consumer:花花:1");

        bus.ack("pipe:pipe_huahua", "group:花花", &entries[0].id)
            .await
            .unwrap();
        let pending = bus.pending("pipe:pipe_huahua", "group:花花").await.unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_new_entries_only_delivered_once() {
        let bus = MemoryBus::new();
        bus.create_group("s", "g", "0").await.unwrap();
        bus.append("s", &[("task", "a")]).await.unwrap();

        let first = bus
            .read_group("s", "g", "c", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        let second = bus
            .read_group("s", "g", "c", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_blocking_read_wakes_on_append() {
        let bus = MemoryBus::new();
        bus.create_group("s", "g", "0").await.unwrap();

        let reader = bus.clone();
        let handle = tokio::spawn(async move {
            reader
                .read_group("s", "g", "c", 1, Duration::from_secs(5))
                .await
                .unwrap()
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.append("s", &[("task", "wake")]).await.unwrap();

        let entries = handle.await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].field("task"), Some("wake"));
    }

    #[tokio::test]
    async fn test_create_group_is_idempotent() {
        let bus = MemoryBus::new();
        bus.append("s", &[("task", "a")]).await.unwrap();
        bus.create_group("s", "g", "0").await.unwrap();
        let _ = bus
            .read_group("s", "g", "c", 10, Duration::from_millis(10))
            .await
            .unwrap();
        // Re-creating must not reset the cursor.
        bus.create_group("s", "g", "0").await.unwrap();
        let entries = bus
            .read_group("s", "g", "c", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_groups_have_independent_cursors() {
        let bus = MemoryBus::new();
        bus.create_group("s", "g1", "0").await.unwrap();
        bus.create_group("s", "g2", "0").await.unwrap();
        bus.append("s", &[("task", "a")]).await.unwrap();

        let a = bus
            .read_group("s", "g1", "c", 1, Duration::from_millis(10))
            .await
            .unwrap();
        let b = bus
            .read_group("s", "g2", "c", 1, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[tokio::test]
    async fn test_claim_stale_reassigns_unacked_entry() {
        let bus = MemoryBus::new();
        bus.create_group("s", "g", "0").await.unwrap();
        bus.append("s", &[("task", "orphaned")]).await.unwrap();

        // A consumer reads the entry and dies without acking.
        let read = bus
            .read_group("s", "g", "consumer:dead", 1, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(read.len(), 1);

        // Not stale yet under a generous threshold.
        let none = bus
            .claim_stale("s", "g", "consumer:alive", Duration::from_secs(60), 10)
            .await
            .unwrap();
        assert!(none.is_empty());

        let claimed = bus
            .claim_stale("s", "g", "consumer:alive", Duration::ZERO, 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].field("task"), Some("orphaned"));

        let pending = bus.pending("s", "g").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].consumer, "consumer:alive");
        assert_eq!(pending[0].delivery_count, 2);

        bus.ack("s", "g", &claimed[0].id).await.unwrap();
        assert!(bus.pending("s", "g").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claim_stale_on_missing_stream_is_empty() {
        let bus = MemoryBus::new();
        let claimed = bus
            .claim_stale("nope", "g", "c", Duration::ZERO, 10)
            .await
            .unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn test_delete_stream() {
        let bus = MemoryBus::new();
        bus.create_group("s", "g", "0").await.unwrap();
        bus.append("s", &[("task", "a")]).await.unwrap();
        bus.delete_stream("s").await.unwrap();
        assert!(bus.entries("s").await.is_empty());
        // The group went with the stream.
        assert!(bus
            .read_group("s", "g", "c", 1, Duration::from_millis(10))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_kv_and_sets() {
        let bus = MemoryBus::new();
        bus.kv_set("session:s1", "{}").await.unwrap();
        assert_eq!(bus.kv_get("session:s1").await.unwrap().as_deref(), Some("{}"));
        bus.kv_del("session:s1").await.unwrap();
        assert_eq!(bus.kv_get("session:s1").await.unwrap(), None);

        bus.set_add("sessions:list", "s1").await.unwrap();
        bus.set_add("sessions:list", "s2").await.unwrap();
        bus.set_add("sessions:list", "s1").await.unwrap();
        let members = bus.set_members("sessions:list").await.unwrap();
        assert_eq!(members, vec!["s1", "s2"]);
        bus.set_remove("sessions:list", "s1").await.unwrap();
        assert_eq!(bus.set_members("sessions:list").await.unwrap(), vec!["s2"]);
    }
}
