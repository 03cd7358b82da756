//! Moves due scheduled jobs onto live queues.
//!
//! One pass over a shard's schedule:
//!
//! 1. Fetch up to `batch_size` due entries (routing checks disabled, the
//!    schedule belongs to the shard being polled).
//! 2. Claim each entry by removing it; a failed removal means another poller
//!    won and the entry is skipped.
//! 3. Resolve the job's current worker definition, route it afresh and push
//!    it under an explicit route to the resolved shard.
//!
//! A job whose push fails is put back on the source schedule with its
//! original score and skipped for the rest of the pass, so due jobs behind it
//! are still dispatched. Entries that cannot be dispatched at all are
//! reported and dropped without stopping the batch.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::job::{now_score, JobDescriptor};
use super::workers::WorkerRegistry;
use crate::backend::ScheduledEntry;
use crate::error::{DroppedJobError, QueueError};
use crate::metrics::MetricsCollector;
use crate::sharding::{
    with_explicit_route, with_routing_checks_disabled, ErrorTracker, Router, ShardInstance,
    TrackingContext,
};

/// Default number of entries fetched per round trip.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Counters of one requeue pass over a shard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequeueReport {
    /// Shard whose schedule was polled.
    pub shard: String,
    /// Entries this pass removed from the schedule.
    pub claimed: u64,
    /// Claimed jobs pushed onto a live queue.
    pub dispatched: u64,
    /// Dispatched jobs that landed on a different shard than the source.
    pub rerouted: u64,
    /// Claimed entries that were dropped.
    pub dropped: u64,
    /// Claimed jobs put back on the schedule after a failed push.
    pub returned: u64,
    /// Entries claimed by someone else first.
    pub contended: u64,
}

impl RequeueReport {
    fn new(shard: &str) -> Self {
        Self {
            shard: shard.to_string(),
            ..Default::default()
        }
    }
}

enum Outcome {
    Dispatched { rerouted: bool },
    Returned,
    Dropped,
}

/// Requeues due jobs from shard schedules.
pub struct ScheduledRequeuer {
    router: Arc<Router>,
    workers: Arc<dyn WorkerRegistry>,
    tracker: Arc<dyn ErrorTracker>,
    metrics: MetricsCollector,
    batch_size: usize,
}

impl ScheduledRequeuer {
    pub fn new(
        router: Arc<Router>,
        workers: Arc<dyn WorkerRegistry>,
        tracker: Arc<dyn ErrorTracker>,
    ) -> Self {
        Self {
            router,
            workers,
            tracker,
            metrics: MetricsCollector::new(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Sets the number of entries fetched per round trip.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Returns the router.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Requeues every job on `source` that is due now.
    pub async fn enqueue_due_jobs(
        &self,
        source: &ShardInstance,
    ) -> Result<RequeueReport, QueueError> {
        self.enqueue_due_jobs_at(source, now_score()).await
    }

    /// Requeues every job on `source` with a due time at or before `now`.
    ///
    /// # Errors
    ///
    /// Returns the backend error if fetching or claiming fails. Jobs claimed
    /// before the failure have already been dispatched.
    pub async fn enqueue_due_jobs_at(
        &self,
        source: &ShardInstance,
        now: f64,
    ) -> Result<RequeueReport, QueueError> {
        let mut report = RequeueReport::new(source.name());
        // Payloads put back during this pass; they stay due, so later fetches
        // over-read by this many entries and skip them.
        let mut returned: HashSet<String> = HashSet::new();

        loop {
            let limit = self.batch_size + returned.len();
            let entries = with_routing_checks_disabled(source.due_entries(now, limit)).await?;
            let fetched = entries.len();
            let mut fresh = 0usize;

            for entry in entries {
                if returned.contains(&entry.payload) {
                    continue;
                }
                fresh += 1;

                let claimed =
                    with_routing_checks_disabled(source.remove_scheduled(&entry.payload)).await?;
                if !claimed {
                    report.contended += 1;
                    continue;
                }
                report.claimed += 1;

                match self.dispatch(source, &entry).await {
                    Outcome::Dispatched { rerouted } => {
                        report.dispatched += 1;
                        if rerouted {
                            report.rerouted += 1;
                        }
                    }
                    Outcome::Returned => {
                        report.returned += 1;
                        returned.insert(entry.payload);
                    }
                    Outcome::Dropped => report.dropped += 1,
                }
            }

            if fresh == 0 || fetched < limit {
                break;
            }
        }

        if report.claimed > 0 {
            info!(
                shard = %report.shard,
                claimed = report.claimed,
                dispatched = report.dispatched,
                rerouted = report.rerouted,
                dropped = report.dropped,
                returned = report.returned,
                "Requeued scheduled jobs"
            );
        }

        Ok(report)
    }

    async fn dispatch(&self, source: &ShardInstance, entry: &ScheduledEntry) -> Outcome {
        let mut job = match JobDescriptor::from_payload(&entry.payload) {
            Ok(job) => job,
            Err(e) => {
                self.drop_job(
                    DroppedJobError::Malformed {
                        shard: source.name().to_string(),
                        source: e,
                    },
                    "malformed",
                    source,
                );
                return Outcome::Dropped;
            }
        };

        let Some(options) = self.workers.lookup(&job.class) else {
            self.drop_job(
                DroppedJobError::UnknownWorker {
                    jid: job.jid.to_string(),
                    class: job.class.clone(),
                },
                "unknown_worker",
                source,
            );
            return Outcome::Dropped;
        };

        job.store = options.store;
        let decision = self.router.route(job.store.as_deref());
        if job.stamp_queue(&options.queue) {
            debug!(jid = %job.jid, queue = %job.queue, "Queue changed since scheduling");
        }
        job.at = None;
        job.enqueued_at = Some(Utc::now());

        let instance = decision.instance;
        let pushed = match job.to_payload() {
            Ok(payload) => {
                with_explicit_route(instance, instance.push(&job.queue, &payload)).await
            }
            Err(e) => Err(QueueError::from(e)),
        };

        match pushed {
            Ok(()) => {
                self.metrics.record_requeue(decision.shard_name);
                let rerouted = decision.shard_name != source.name();
                debug!(
                    jid = %job.jid,
                    class = %job.class,
                    source = source.name(),
                    target = decision.shard_name,
                    reason = %decision.reason,
                    "Dispatched scheduled job"
                );
                Outcome::Dispatched { rerouted }
            }
            Err(push_err) => {
                warn!(
                    jid = %job.jid,
                    target = decision.shard_name,
                    error = %push_err,
                    "Dispatch failed, returning job to schedule"
                );
                let restored = with_routing_checks_disabled(
                    source.schedule(&entry.payload, entry.score),
                )
                .await;
                match restored {
                    Ok(()) => Outcome::Returned,
                    Err(restore_err) => {
                        self.drop_job(
                            DroppedJobError::Lost {
                                jid: job.jid.to_string(),
                                message: format!("push: {push_err}; reschedule: {restore_err}"),
                            },
                            "lost",
                            source,
                        );
                        Outcome::Dropped
                    }
                }
            }
        }
    }

    fn drop_job(&self, err: DroppedJobError, reason: &'static str, source: &ShardInstance) {
        error!(shard = source.name(), reason = reason, error = %err, "Dropping scheduled job");
        self.tracker.track_exception(
            &err,
            &TrackingContext::new("requeuer")
                .with("shard", source.name())
                .with("reason", reason),
        );
        self.metrics.record_dropped(reason);
    }
}
