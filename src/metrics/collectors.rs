//! Metric recording for routing and requeue operations.
//!
//! `MetricsCollector` wraps the raw Prometheus metrics with one method per
//! event so call sites stay free of label bookkeeping. Every method is a
//! no-op until `init_metrics()` has run.

use super::prometheus::{
    JOBS_DROPPED_TOTAL, JOBS_ENQUEUED_TOTAL, JOBS_REQUEUED_TOTAL, ROUTING_DECISIONS_TOTAL,
    ROUTING_VIOLATIONS_TOTAL, SCHEDULE_POLL_SECONDS,
};

/// Kind of enqueue performed by the sharded client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueKind {
    /// Pushed straight onto a live queue.
    Immediate,
    /// Added to the shard's schedule.
    Scheduled,
}

impl EnqueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnqueueKind::Immediate => "immediate",
            EnqueueKind::Scheduled => "scheduled",
        }
    }
}

/// Metrics collector for routing and requeue events.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Create a new MetricsCollector instance.
    pub fn new() -> Self {
        Self
    }

    /// Record a routing decision.
    pub fn record_routing_decision(&self, requested: &str, resolved: &str, reason: &str) {
        if let Some(decisions) = ROUTING_DECISIONS_TOTAL.get() {
            decisions
                .with_label_values(&[requested, resolved, reason])
                .inc();
        }
    }

    /// Record a storage call that bypassed routing.
    pub fn record_routing_violation(&self, shard: &str, operation: &str, mode: &str) {
        if let Some(violations) = ROUTING_VIOLATIONS_TOTAL.get() {
            violations
                .with_label_values(&[shard, operation, mode])
                .inc();
        }

        tracing::trace!(
            shard = shard,
            operation = operation,
            mode = mode,
            "Recorded routing violation metric"
        );
    }

    /// Record a job enqueued through the sharded client.
    pub fn record_enqueue(&self, shard: &str, kind: EnqueueKind) {
        if let Some(enqueued) = JOBS_ENQUEUED_TOTAL.get() {
            enqueued.with_label_values(&[shard, kind.as_str()]).inc();
        }
    }

    /// Record a scheduled job moved to a live queue.
    pub fn record_requeue(&self, shard: &str) {
        if let Some(requeued) = JOBS_REQUEUED_TOTAL.get() {
            requeued.with_label_values(&[shard]).inc();
        }
    }

    /// Record a claimed job that was dropped.
    pub fn record_dropped(&self, reason: &str) {
        if let Some(dropped) = JOBS_DROPPED_TOTAL.get() {
            dropped.with_label_values(&[reason]).inc();
        }
    }

    /// Record the duration of one schedule poll.
    pub fn record_poll_duration(&self, duration_secs: f64) {
        if let Some(poll) = SCHEDULE_POLL_SECONDS.get() {
            poll.observe(duration_secs);
        }
    }
}
