//! Redis queue backend.
//!
//! Live queues are Redis lists (LPUSH on enqueue, BRPOP on dequeue) and the
//! schedule is a sorted set scored by due time. Claiming a due entry relies
//! on `ZREM` returning 1 for exactly one caller, which holds across every
//! process connected to the same instance.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{queue_key, QueueBackend, ScheduledEntry, QUEUES_KEY, SCHEDULE_KEY};
use crate::error::QueueError;

/// Queue backend for one Redis instance.
pub struct RedisBackend {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
}

impl RedisBackend {
    /// Connects to the Redis instance serving a shard.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the URL is invalid or the
    /// connection cannot be established.
    pub async fn connect(shard: &str, redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(|e| QueueError::ConnectionFailed {
            shard: shard.to_string(),
            message: e.to_string(),
        })?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed {
                shard: shard.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self { redis })
    }
}

#[async_trait]
impl QueueBackend for RedisBackend {
    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }

    async fn push(&self, queue: &str, payload: &str) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.sadd(QUEUES_KEY, queue)
            .ignore()
            .lpush(queue_key(queue), payload)
            .ignore();
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>, QueueError> {
        let mut conn = self.redis.clone();
        let timeout_secs = timeout.as_secs().max(1) as usize;

        // BRPOP replies with [key, value] or nil on timeout
        let result: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(queue_key(queue))
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        Ok(result.map(|(_, payload)| payload))
    }

    async fn schedule(&self, payload: &str, at: f64) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        conn.zadd::<_, _, _, ()>(SCHEDULE_KEY, payload, at).await?;
        Ok(())
    }

    async fn due_entries(
        &self,
        now: f64,
        limit: usize,
    ) -> Result<Vec<ScheduledEntry>, QueueError> {
        let mut conn = self.redis.clone();

        let entries: Vec<(String, f64)> = redis::cmd("ZRANGEBYSCORE")
            .arg(SCHEDULE_KEY)
            .arg("-inf")
            .arg(now)
            .arg("WITHSCORES")
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await?;

        Ok(entries
            .into_iter()
            .map(|(payload, score)| ScheduledEntry { payload, score })
            .collect())
    }

    async fn remove_scheduled(&self, payload: &str) -> Result<bool, QueueError> {
        let mut conn = self.redis.clone();
        let removed: usize = conn.zrem(SCHEDULE_KEY, payload).await?;
        Ok(removed > 0)
    }

    async fn queue_len(&self, queue: &str) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(queue_key(queue)).await?;
        Ok(len)
    }

    async fn schedule_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.zcard(SCHEDULE_KEY).await?;
        Ok(len)
    }

    async fn queue_names(&self) -> Result<Vec<String>, QueueError> {
        let mut conn = self.redis.clone();
        let mut names: Vec<String> = conn.smembers(QUEUES_KEY).await?;
        names.sort();
        Ok(names)
    }
}
