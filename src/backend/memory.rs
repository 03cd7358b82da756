//! In-process queue backend.
//!
//! Mirrors the Redis key layout with plain collections behind one lock, so
//! the claim (`remove_scheduled`) has the same compare-and-remove semantics
//! as `ZREM`. Used for `memory://` shards and in tests.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use ordered_float::OrderedFloat;
use tokio::sync::Mutex;

use super::{QueueBackend, ScheduledEntry};
use crate::error::QueueError;

#[derive(Debug, Default)]
struct MemoryState {
    /// Live queues; new payloads at the front, oldest at the back.
    queues: HashMap<String, VecDeque<String>>,
    /// Schedule ordered by (score, payload).
    schedule: BTreeSet<(OrderedFloat<f64>, String)>,
    /// Member -> score, so removal by payload is O(log n).
    scores: HashMap<String, OrderedFloat<f64>>,
}

/// Queue backend held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the payloads of a live queue, oldest first, without removing them.
    pub async fn queue_contents(&self, queue: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .queues
            .get(queue)
            .map(|q| q.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns every scheduled entry, oldest first.
    pub async fn scheduled_entries(&self) -> Vec<ScheduledEntry> {
        let state = self.state.lock().await;
        state
            .schedule
            .iter()
            .map(|(score, payload)| ScheduledEntry {
                payload: payload.clone(),
                score: score.into_inner(),
            })
            .collect()
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn push(&self, queue: &str, payload: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_front(payload.to_string());
        Ok(())
    }

    async fn pop(&self, queue: &str, _timeout: Duration) -> Result<Option<String>, QueueError> {
        let mut state = self.state.lock().await;
        Ok(state.queues.get_mut(queue).and_then(|q| q.pop_back()))
    }

    async fn schedule(&self, payload: &str, at: f64) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let score = OrderedFloat(at);
        // ZADD semantics: re-adding a member updates its score.
        if let Some(previous) = state.scores.insert(payload.to_string(), score) {
            state.schedule.remove(&(previous, payload.to_string()));
        }
        state.schedule.insert((score, payload.to_string()));
        Ok(())
    }

    async fn due_entries(
        &self,
        now: f64,
        limit: usize,
    ) -> Result<Vec<ScheduledEntry>, QueueError> {
        let state = self.state.lock().await;
        Ok(state
            .schedule
            .iter()
            .take_while(|(score, _)| score.into_inner() <= now)
            .take(limit)
            .map(|(score, payload)| ScheduledEntry {
                payload: payload.clone(),
                score: score.into_inner(),
            })
            .collect())
    }

    async fn remove_scheduled(&self, payload: &str) -> Result<bool, QueueError> {
        let mut state = self.state.lock().await;
        match state.scores.remove(payload) {
            Some(score) => {
                state.schedule.remove(&(score, payload.to_string()));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn queue_len(&self, queue: &str) -> Result<usize, QueueError> {
        let state = self.state.lock().await;
        Ok(state.queues.get(queue).map(VecDeque::len).unwrap_or(0))
    }

    async fn schedule_len(&self) -> Result<usize, QueueError> {
        let state = self.state.lock().await;
        Ok(state.schedule.len())
    }

    async fn queue_names(&self) -> Result<Vec<String>, QueueError> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state.queues.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_pop_is_fifo() {
        let backend = MemoryBackend::new();
        backend.push("default", "a").await.unwrap();
        backend.push("default", "b").await.unwrap();

        assert_eq!(backend.queue_contents("default").await, vec!["a", "b"]);
        assert_eq!(
            backend.pop("default", Duration::from_secs(1)).await.unwrap(),
            Some("a".to_string())
        );
        assert_eq!(backend.queue_len("default").await.unwrap(), 1);
        assert_eq!(
            backend.pop("missing", Duration::from_secs(1)).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_due_entries_are_score_ordered_and_bounded() {
        let backend = MemoryBackend::new();
        backend.schedule("late", 300.0).await.unwrap();
        backend.schedule("early", 100.0).await.unwrap();
        backend.schedule("middle", 200.0).await.unwrap();

        let due = backend.due_entries(250.0, 10).await.unwrap();
        let payloads: Vec<&str> = due.iter().map(|e| e.payload.as_str()).collect();
        assert_eq!(payloads, vec!["early", "middle"]);

        let due = backend.due_entries(1000.0, 1).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].payload, "early");

        // Reading does not claim.
        assert_eq!(backend.schedule_len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_remove_scheduled_succeeds_once() {
        let backend = MemoryBackend::new();
        backend.schedule("job", 1.0).await.unwrap();

        assert!(backend.remove_scheduled("job").await.unwrap());
        assert!(!backend.remove_scheduled("job").await.unwrap());
        assert_eq!(backend.schedule_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_schedule_same_member_updates_score() {
        let backend = MemoryBackend::new();
        backend.schedule("job", 500.0).await.unwrap();
        backend.schedule("job", 5.0).await.unwrap();

        let entries = backend.scheduled_entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].score, 5.0);
    }

    #[tokio::test]
    async fn test_queue_names_sorted() {
        let backend = MemoryBackend::new();
        backend.push("mailers", "x").await.unwrap();
        backend.push("default", "y").await.unwrap();
        assert_eq!(
            backend.queue_names().await.unwrap(),
            vec!["default".to_string(), "mailers".to_string()]
        );
    }
}
