//! Routed enqueue client.
//!
//! Every push or schedule goes through the router and runs inside an
//! explicit-route scope for the resolved shard, so the access guard never
//! sees client traffic as a violation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use super::job::{now_score, JobDescriptor};
use super::workers::WorkerRegistry;
use crate::error::QueueError;
use crate::metrics::{EnqueueKind, MetricsCollector};
use crate::sharding::{with_explicit_route, Router};

/// Result of a routed enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnqueueReceipt {
    /// Id of the enqueued job.
    pub jid: Uuid,
    /// Shard the job was written to.
    pub shard: String,
    /// Queue the job was written to.
    pub queue: String,
    /// Whether the job went to the schedule rather than a live queue.
    pub scheduled: bool,
}

/// Client that enqueues jobs on the shard chosen by the router.
pub struct ShardedClient {
    router: Arc<Router>,
    workers: Arc<dyn WorkerRegistry>,
    metrics: MetricsCollector,
}

impl ShardedClient {
    pub fn new(router: Arc<Router>, workers: Arc<dyn WorkerRegistry>) -> Self {
        Self {
            router,
            workers,
            metrics: MetricsCollector::new(),
        }
    }

    /// Enqueues a job for immediate execution.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::UnknownWorker` if the class is not registered,
    /// or the backend error of the resolved shard.
    pub async fn perform_async(
        &self,
        class: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<EnqueueReceipt, QueueError> {
        let job = self.build(class, args)?;
        self.enqueue(job).await
    }

    /// Enqueues a job to run after `delay`.
    pub async fn perform_in(
        &self,
        class: &str,
        args: Vec<serde_json::Value>,
        delay: Duration,
    ) -> Result<EnqueueReceipt, QueueError> {
        let at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delta| Utc::now().checked_add_signed(delta))
            .ok_or(QueueError::InvalidDelay(delay))?;
        let job = self.build(class, args)?.scheduled_at(at);
        self.enqueue(job).await
    }

    /// Writes a prepared job to the shard resolved from its store.
    ///
    /// Jobs whose due time has already passed are pushed straight onto their
    /// queue.
    pub async fn enqueue(&self, mut job: JobDescriptor) -> Result<EnqueueReceipt, QueueError> {
        let decision = self.router.route(job.store.as_deref());
        let instance = decision.instance;

        let due = job.at.filter(|at| *at > now_score());
        let kind = if due.is_some() {
            EnqueueKind::Scheduled
        } else {
            job.at = None;
            job.enqueued_at = Some(Utc::now());
            EnqueueKind::Immediate
        };

        let payload = job.to_payload()?;
        with_explicit_route(instance, async {
            match due {
                Some(at) => instance.schedule(&payload, at).await,
                None => instance.push(&job.queue, &payload).await,
            }
        })
        .await?;

        self.metrics.record_enqueue(decision.shard_name, kind);
        debug!(
            jid = %job.jid,
            class = %job.class,
            queue = %job.queue,
            shard = decision.shard_name,
            reason = %decision.reason,
            kind = kind.as_str(),
            "Job enqueued"
        );

        Ok(EnqueueReceipt {
            jid: job.jid,
            shard: decision.shard_name.to_string(),
            queue: job.queue,
            scheduled: kind == EnqueueKind::Scheduled,
        })
    }

    fn build(
        &self,
        class: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<JobDescriptor, QueueError> {
        let options = self
            .workers
            .lookup(class)
            .ok_or_else(|| QueueError::UnknownWorker(class.to_string()))?;

        if options.store.is_some() && !self.router.sharding_enabled() {
            info!(
                class = class,
                store = ?options.store,
                "Worker declares a store but only the main shard is configured"
            );
        }

        Ok(JobDescriptor::new(class, options.queue)
            .with_store(options.store)
            .with_args(args))
    }

    /// Returns the router.
    pub fn router(&self) -> &Router {
        &self.router
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, QueueBackend};
    use crate::scheduler::workers::{StaticWorkerRegistry, WorkerOptions};
    use crate::sharding::{
        AccessGuard, MigrationState, RecordingTracker, RuntimeMode, ShardRegistry,
        StaticFeatureFlags,
    };

    struct Fixture {
        client: ShardedClient,
        main: Arc<MemoryBackend>,
        shard_a: Arc<MemoryBackend>,
        flags: Arc<StaticFeatureFlags>,
    }

    fn fixture() -> Fixture {
        let main = Arc::new(MemoryBackend::new());
        let shard_a = Arc::new(MemoryBackend::new());
        let tracker = Arc::new(RecordingTracker::new());
        let guard = Arc::new(AccessGuard::new(RuntimeMode::Test, tracker.clone()));
        let registry = ShardRegistry::new(
            vec![
                ("main".to_string(), main.clone() as Arc<dyn QueueBackend>),
                ("queues_shard_a".to_string(), shard_a.clone() as Arc<dyn QueueBackend>),
            ],
            guard,
        )
        .expect("valid registry");
        let flags = Arc::new(StaticFeatureFlags::new());
        let router = Router::new(
            Arc::new(registry),
            Arc::new(MigrationState::new(None)),
            flags.clone(),
            tracker,
        );
        let workers = StaticWorkerRegistry::with_workers([
            ("PlainWorker", WorkerOptions::new("default")),
            (
                "ShardedWorker",
                WorkerOptions::new("sharded").with_store("queues_shard_a"),
            ),
        ]);

        Fixture {
            client: ShardedClient::new(Arc::new(router), Arc::new(workers)),
            main,
            shard_a,
            flags,
        }
    }

    #[tokio::test]
    async fn test_perform_async_routes_to_main_without_flag() {
        let fx = fixture();
        let receipt = fx
            .client
            .perform_async("ShardedWorker", vec![serde_json::json!(1)])
            .await
            .expect("enqueued");

        assert_eq!(receipt.shard, "main");
        assert!(!receipt.scheduled);
        assert_eq!(fx.main.queue_contents("sharded").await.len(), 1);
        assert!(fx.shard_a.queue_contents("sharded").await.is_empty());
    }

    #[tokio::test]
    async fn test_perform_async_routes_to_shard_with_flag() {
        let fx = fixture();
        fx.flags.enable_route("queues_shard_a");

        let receipt = fx
            .client
            .perform_async("ShardedWorker", vec![])
            .await
            .expect("enqueued");

        assert_eq!(receipt.shard, "queues_shard_a");
        let contents = fx.shard_a.queue_contents("sharded").await;
        assert_eq!(contents.len(), 1);
        let job = JobDescriptor::from_payload(&contents[0]).unwrap();
        assert_eq!(job.jid, receipt.jid);
        assert!(job.enqueued_at.is_some());
    }

    #[tokio::test]
    async fn test_perform_in_schedules_on_resolved_shard() {
        let fx = fixture();
        fx.flags.enable_route("queues_shard_a");

        let receipt = fx
            .client
            .perform_in("ShardedWorker", vec![], Duration::from_secs(3600))
            .await
            .expect("scheduled");

        assert!(receipt.scheduled);
        assert_eq!(fx.shard_a.scheduled_entries().await.len(), 1);
        assert!(fx.shard_a.queue_contents("sharded").await.is_empty());
        assert!(fx.main.scheduled_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_past_due_job_is_pushed_immediately() {
        let fx = fixture();
        let job = JobDescriptor::new("PlainWorker", "default")
            .scheduled_at(Utc::now() - chrono::Duration::seconds(30));

        let receipt = fx.client.enqueue(job).await.expect("enqueued");

        assert!(!receipt.scheduled);
        assert!(fx.main.scheduled_entries().await.is_empty());
        let contents = fx.main.queue_contents("default").await;
        assert_eq!(contents.len(), 1);
        assert!(JobDescriptor::from_payload(&contents[0]).unwrap().at.is_none());
    }

    #[tokio::test]
    async fn test_unknown_worker_is_rejected() {
        let fx = fixture();
        let result = fx.client.perform_async("Missing", vec![]).await;
        assert!(matches!(result, Err(QueueError::UnknownWorker(class)) if class == "Missing"));
    }
}
