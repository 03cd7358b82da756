//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use queue_sharding::backend::{MemoryBackend, QueueBackend};
use queue_sharding::scheduler::{StaticWorkerRegistry, WorkerOptions};
use queue_sharding::sharding::{
    AccessGuard, MigrationState, RecordingTracker, Router, RuntimeMode, ShardRegistry,
    StaticFeatureFlags,
};

pub const SHARD_A: &str = "queues_shard_a";
pub const SHARD_B: &str = "queues_shard_b";

/// Three in-memory shards wired to a router; `SHARD_B` is migrated.
pub struct Cluster {
    pub router: Arc<Router>,
    pub flags: Arc<StaticFeatureFlags>,
    pub tracker: Arc<RecordingTracker>,
    pub workers: Arc<StaticWorkerRegistry>,
    pub main: Arc<MemoryBackend>,
    pub shard_a: Arc<MemoryBackend>,
    pub shard_b: Arc<MemoryBackend>,
}

impl Cluster {
    pub fn new(mode: RuntimeMode) -> Self {
        let main = Arc::new(MemoryBackend::new());
        let shard_a = Arc::new(MemoryBackend::new());
        let shard_b = Arc::new(MemoryBackend::new());
        let tracker = Arc::new(RecordingTracker::new());
        let guard = Arc::new(AccessGuard::new(mode, tracker.clone()));

        let registry = ShardRegistry::new(
            vec![
                ("main".to_string(), main.clone() as Arc<dyn QueueBackend>),
                (SHARD_A.to_string(), shard_a.clone() as Arc<dyn QueueBackend>),
                (SHARD_B.to_string(), shard_b.clone() as Arc<dyn QueueBackend>),
            ],
            guard,
        )
        .expect("valid registry");

        let flags = Arc::new(StaticFeatureFlags::new());
        let router = Arc::new(Router::new(
            Arc::new(registry),
            Arc::new(MigrationState::new(Some(format!(r#"["{SHARD_B}"]"#)))),
            flags.clone(),
            tracker.clone(),
        ));

        let workers = Arc::new(StaticWorkerRegistry::with_workers([
            ("PlainWorker", WorkerOptions::new("default")),
            ("ShardAWorker", WorkerOptions::new("shard_a_jobs").with_store(SHARD_A)),
            ("ShardBWorker", WorkerOptions::new("shard_b_jobs").with_store(SHARD_B)),
        ]));

        Self {
            router,
            flags,
            tracker,
            workers,
            main,
            shard_a,
            shard_b,
        }
    }
}
