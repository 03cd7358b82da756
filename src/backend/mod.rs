//! Queue storage backends.
//!
//! A backend is one instance of the queue storage engine. The router never
//! decides how jobs are stored inside it, only which instance to talk to, so
//! this module exposes the small set of primitives the router and the
//! scheduled requeuer need:
//!
//! - **Live queues**: `push` / `pop` on named FIFO lists
//! - **Schedule**: a score-ordered set of delayed job payloads (score is the
//!   due time as fractional unix seconds)
//! - **Claim**: `remove_scheduled` is compare-and-remove; exactly one caller
//!   observes `true` for a given payload, across processes
//!
//! # Key Layout (Redis)
//!
//! - `queue:{name}`: live list for a queue (LPUSH / BRPOP)
//! - `queues`: set of known queue names
//! - `schedule`: sorted set of delayed payloads

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueError;

pub use self::memory::MemoryBackend;
pub use self::redis::RedisBackend;

/// Key of the sorted set holding delayed jobs.
pub const SCHEDULE_KEY: &str = "schedule";

/// Key of the set holding every queue name that has received a push.
pub const QUEUES_KEY: &str = "queues";

/// Returns the storage key of a live queue.
pub fn queue_key(queue: &str) -> String {
    format!("queue:{}", queue)
}

/// A delayed payload read from the schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEntry {
    /// Serialized job descriptor, also the set member.
    pub payload: String,
    /// Due time in fractional unix seconds.
    pub score: f64,
}

/// Primitive operations of one queue storage instance.
///
/// Implementations perform no routing checks; they are always reached
/// through a [`ShardInstance`](crate::sharding::ShardInstance), which is
/// where the access guard intercepts calls.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Checks that the instance is reachable.
    async fn ping(&self) -> Result<(), QueueError>;

    /// Appends a payload to the tail of a live queue.
    async fn push(&self, queue: &str, payload: &str) -> Result<(), QueueError>;

    /// Removes the oldest payload from a live queue, waiting up to `timeout`.
    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>, QueueError>;

    /// Adds a payload to the schedule with the given due time.
    async fn schedule(&self, payload: &str, at: f64) -> Result<(), QueueError>;

    /// Returns up to `limit` schedule entries with score <= `now`, oldest first.
    ///
    /// Reading does not claim; callers must win [`remove_scheduled`] first.
    ///
    /// [`remove_scheduled`]: QueueBackend::remove_scheduled
    async fn due_entries(&self, now: f64, limit: usize)
        -> Result<Vec<ScheduledEntry>, QueueError>;

    /// Atomically removes a payload from the schedule.
    ///
    /// Returns `true` only for the caller that actually removed it.
    async fn remove_scheduled(&self, payload: &str) -> Result<bool, QueueError>;

    /// Number of payloads waiting in a live queue.
    async fn queue_len(&self, queue: &str) -> Result<usize, QueueError>;

    /// Number of payloads in the schedule.
    async fn schedule_len(&self) -> Result<usize, QueueError>;

    /// Names of every queue that has received a push.
    async fn queue_names(&self) -> Result<Vec<String>, QueueError>;
}

/// Opens a backend for a shard from its endpoint URL.
///
/// `redis://` and `rediss://` URLs connect to Redis; `memory://` creates an
/// in-process backend.
pub async fn connect(shard: &str, url: &str) -> Result<Arc<dyn QueueBackend>, QueueError> {
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        let backend = RedisBackend::connect(shard, url).await?;
        Ok(Arc::new(backend))
    } else if url.starts_with("memory://") {
        Ok(Arc::new(MemoryBackend::new()))
    } else {
        Err(QueueError::UnsupportedScheme(url.to_string()))
    }
}
