use crate::{Bus, PendingEntry, StreamEntry};
use async_trait::async_trait;
use parley_core::{ParleyError, ParleyResult};
use redis::aio::MultiplexedConnection;
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;

const PENDING_BATCH: usize = 1000;

/// Redis-backed [`Bus`].
///
/// Holds two multiplexed connections: blocking group reads run on their own
/// pipeline so a `BLOCK 1000` poll cannot stall appends and KV traffic
/// issued concurrently from the same process.
pub struct RedisBus {
    conn: MultiplexedConnection,
    blocking: MultiplexedConnection,
}

impl RedisBus {
    /// Connects to Redis at `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> ParleyResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| ParleyError::Bus(format!("invalid redis url: {}", e)))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(busify)?;
        let blocking = client
            .get_multiplexed_async_connection()
            .await
            .map_err(busify)?;
        Ok(Self { conn, blocking })
    }
}

fn busify(e: redis::RedisError) -> ParleyError {
    ParleyError::Bus(e.to_string())
}

fn field_string(value: &redis::Value) -> String {
    redis::from_redis_value::<String>(value).unwrap_or_default()
}

fn entry_from_stream_id(id: StreamId) -> StreamEntry {
    let fields: HashMap<String, String> = id
        .map
        .iter()
        .map(|(k, v)| (k.clone(), field_string(v)))
        .collect();
    StreamEntry { id: id.id, fields }
}

#[async_trait]
impl Bus for RedisBus {
    async fn ping(&self) -> ParleyResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(busify)?;
        Ok(())
    }

    async fn append(&self, stream: &str, fields: &[(&str, &str)]) -> ParleyResult<String> {
        let mut conn = self.conn.clone();
        let id: String = conn.xadd(stream, "*", fields).await.map_err(busify)?;
        Ok(id)
    }

    async fn create_group(&self, stream: &str, group: &str, start: &str) -> ParleyResult<()> {
        let mut conn = self.conn.clone();
        let created: Result<String, redis::RedisError> =
            conn.xgroup_create_mkstream(stream, group, start).await;
        match created {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(busify(e)),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> ParleyResult<Vec<StreamEntry>> {
        let mut conn = self.blocking.clone();
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block.as_millis() as usize);
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[stream], &[">"], &opts)
            .await
            .map_err(busify)?;

        let mut entries = Vec::new();
        if let Some(reply) = reply {
            for key in reply.keys {
                entries.extend(key.ids.into_iter().map(entry_from_stream_id));
            }
        }
        Ok(entries)
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> ParleyResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(stream, group, &[entry_id])
            .await
            .map_err(busify)?;
        Ok(())
    }

    async fn pending(&self, stream: &str, group: &str) -> ParleyResult<Vec<PendingEntry>> {
        let mut conn = self.conn.clone();
        let reply: StreamPendingCountReply = conn
            .xpending_count(stream, group, "-", "+", PENDING_BATCH)
            .await
            .map_err(busify)?;
        Ok(reply
            .ids
            .into_iter()
            .map(|p| PendingEntry {
                id: p.id,
                consumer: p.consumer,
                delivery_count: p.times_delivered as u64,
            })
            .collect())
    }

    async fn claim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> ParleyResult<Vec<StreamEntry>> {
        let mut conn = self.conn.clone();
        let pending: StreamPendingCountReply = conn
            .xpending_count(stream, group, "-", "+", PENDING_BATCH)
            .await
            .map_err(busify)?;

        let min_idle_ms = min_idle.as_millis() as u64;
        let stale: Vec<String> = pending
            .ids
            .into_iter()
            .filter(|p| p.last_delivered_ms as u64 >= min_idle_ms)
            .map(|p| p.id)
            .take(count)
            .collect();
        if stale.is_empty() {
            return Ok(Vec::new());
        }

        // XCLAIM re-checks the idle time, so an entry another claimer got to
        // first is skipped rather than double-claimed.
        let reply: StreamClaimReply = conn
            .xclaim(stream, group, consumer, min_idle_ms, &stale)
            .await
            .map_err(busify)?;
        Ok(reply.ids.into_iter().map(entry_from_stream_id).collect())
    }

    async fn delete_stream(&self, stream: &str) -> ParleyResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(stream).await.map_err(busify)?;
        Ok(())
    }

    async fn kv_set(&self, key: &str, value: &str) -> ParleyResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await.map_err(busify)?;
        Ok(())
    }

    async fn kv_get(&self, key: &str) -> ParleyResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await.map_err(busify)?;
        Ok(value)
    }

    async fn kv_del(&self, key: &str) -> ParleyResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await.map_err(busify)?;
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> ParleyResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.sadd(key, member).await.map_err(busify)?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> ParleyResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.srem(key, member).await.map_err(busify)?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> ParleyResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(key).await.map_err(busify)?;
        Ok(members)
    }
}
