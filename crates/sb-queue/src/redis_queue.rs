//! Redis-backed job queue
//!
//! Ready jobs live in a list, delayed jobs in a sorted set scored by their
//! ready time. Promotion of due jobs is a single Lua script so concurrent
//! workers never double-promote.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

use sb_common::Job;

use crate::{JobQueue, QueueError, Result};

/// Moves due members of the scheduled zset onto the head of the ready list.
const PROMOTE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 100)
for i, item in ipairs(due) do
    redis.call('LPUSH', KEYS[2], item)
    redis.call('ZREM', KEYS[1], item)
end
return #due
"#;

/// Job queue persisted in Redis.
pub struct RedisJobQueue {
    conn: ConnectionManager,
    identifier: String,
    ready_key: String,
    scheduled_key: String,
}

impl RedisJobQueue {
    pub fn new(conn: ConnectionManager, identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        Self {
            ready_key: format!("queue:{}:ready", identifier),
            scheduled_key: format!("queue:{}:scheduled", identifier),
            conn,
            identifier,
        }
    }

    async fn promote_due(&self) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let mut conn = self.conn.clone();
        let _promoted: i64 = redis::Script::new(PROMOTE_SCRIPT)
            .key(&self.scheduled_key)
            .key(&self.ready_key)
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| QueueError::Redis(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn enqueue(&self, job: Job) -> Result<String> {
        let id = job.id.clone();
        let raw = serde_json::to_string(&job)?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .lpush(&self.ready_key, raw)
            .await
            .map_err(|e| QueueError::Redis(e.to_string()))?;
        Ok(id)
    }

    async fn enqueue_delayed(&self, job: Job, delay: Duration) -> Result<String> {
        let id = job.id.clone();
        let raw = serde_json::to_string(&job)?;
        let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        let mut conn = self.conn.clone();
        let _: () = conn
            .zadd(&self.scheduled_key, raw, ready_at)
            .await
            .map_err(|e| QueueError::Redis(e.to_string()))?;
        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<Job>> {
        self.promote_due().await?;

        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .rpop(&self.ready_key, None)
            .await
            .map_err(|e| QueueError::Redis(e.to_string()))?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn len(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let ready: usize = conn
            .llen(&self.ready_key)
            .await
            .map_err(|e| QueueError::Redis(e.to_string()))?;
        let scheduled: usize = conn
            .zcard(&self.scheduled_key)
            .await
            .map_err(|e| QueueError::Redis(e.to_string()))?;
        Ok(ready + scheduled)
    }
}
