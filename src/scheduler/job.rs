//! Job descriptors.
//!
//! A `JobDescriptor` is the serialized unit of work stored in live queues and
//! in the schedule. The same JSON payload is the schedule member, so two
//! pollers claiming a due job race on exactly the same bytes.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queue used when a worker does not declare one.
pub const DEFAULT_QUEUE: &str = "default";

/// A job in flight between an enqueue call site and a backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobDescriptor {
    /// Unique job id.
    pub jid: Uuid,
    /// Worker class identifier.
    pub class: String,
    /// Positional job arguments.
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    /// Queue the job is pushed to.
    pub queue: String,
    /// Declared store (shard) name; absent means the default shard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
    /// Due time in fractional unix seconds; present only for delayed jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<f64>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last pushed to a live queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enqueued_at: Option<DateTime<Utc>>,
}

impl JobDescriptor {
    /// Creates an immediate job for a worker class and queue.
    pub fn new(class: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            jid: Uuid::new_v4(),
            class: class.into(),
            args: Vec::new(),
            queue: queue.into(),
            store: None,
            at: None,
            created_at: Utc::now(),
            enqueued_at: None,
        }
    }

    /// Sets the job arguments.
    pub fn with_args(mut self, args: Vec<serde_json::Value>) -> Self {
        self.args = args;
        self
    }

    /// Sets the declared store.
    pub fn with_store(mut self, store: Option<String>) -> Self {
        self.store = store;
        self
    }

    /// Schedules the job for a point in time.
    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.at = Some(to_score(at));
        self
    }

    /// Returns whether the job carries a due time.
    pub fn is_scheduled(&self) -> bool {
        self.at.is_some()
    }

    /// Returns the due time as a timestamp, if any.
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        self.at.and_then(from_score)
    }

    /// Replaces the queue; returns whether it changed.
    pub fn stamp_queue(&mut self, queue: &str) -> bool {
        if self.queue == queue {
            return false;
        }
        self.queue = queue.to_string();
        true
    }

    /// Serializes the job to its storage payload.
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses a storage payload.
    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// Converts a timestamp to a schedule score.
pub fn to_score(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

/// Converts a schedule score back to a timestamp.
pub fn from_score(score: f64) -> Option<DateTime<Utc>> {
    Utc.timestamp_micros((score * 1_000_000.0).round() as i64)
        .single()
}

/// Current time as a schedule score.
pub fn now_score() -> f64 {
    to_score(Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_new() {
        let job = JobDescriptor::new("PostReceive", "default");

        assert!(!job.jid.is_nil());
        assert_eq!(job.class, "PostReceive");
        assert_eq!(job.queue, "default");
        assert!(job.args.is_empty());
        assert!(job.store.is_none());
        assert!(!job.is_scheduled());
        assert!(job.enqueued_at.is_none());
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let job = JobDescriptor::new("PostReceive", "default");
        let payload = job.to_payload().expect("serializes");

        assert!(!payload.contains("\"store\""));
        assert!(!payload.contains("\"at\""));
        assert!(!payload.contains("\"enqueued_at\""));
    }

    #[test]
    fn test_scheduled_job_keeps_due_time() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let job = JobDescriptor::new("Cleanup", "cron")
            .with_store(Some("queues_shard_a".to_string()))
            .with_args(vec![serde_json::json!(42), serde_json::json!("x")])
            .scheduled_at(at);

        let parsed = JobDescriptor::from_payload(&job.to_payload().unwrap()).unwrap();
        assert_eq!(parsed, job);
        assert_eq!(parsed.due_at(), Some(at));
        assert_eq!(parsed.store.as_deref(), Some("queues_shard_a"));
    }

    #[test]
    fn test_stamp_queue() {
        let mut job = JobDescriptor::new("PostReceive", "default");
        assert!(!job.stamp_queue("default"));
        assert!(job.stamp_queue("post_receive"));
        assert_eq!(job.queue, "post_receive");
    }

    #[test]
    fn test_malformed_payload_rejected() {
        assert!(JobDescriptor::from_payload("not json").is_err());
        assert!(JobDescriptor::from_payload(r#"{"class": "X"}"#).is_err());
    }

    #[test]
    fn test_score_conversion() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let score = to_score(at);
        assert_eq!(score, at.timestamp() as f64);
        assert_eq!(from_score(score), Some(at));
        assert!(now_score() > score - 1.0e9);
    }
}
