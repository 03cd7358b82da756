//! Integration tests for routed enqueueing and scheduled job requeueing.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{Cluster, SHARD_A, SHARD_B};
use queue_sharding::backend::QueueBackend;
use queue_sharding::scheduler::{
    JobDescriptor, PollerConfig, SchedulePoller, ScheduledRequeuer, ShardedClient,
};
use queue_sharding::sharding::RuntimeMode;

/// A score later than anything scheduled in these tests.
const FAR_FUTURE: f64 = 1.0e12;

fn requeuer(cluster: &Cluster) -> ScheduledRequeuer {
    ScheduledRequeuer::new(
        cluster.router.clone(),
        cluster.workers.clone(),
        cluster.tracker.clone(),
    )
}

fn client(cluster: &Cluster) -> ShardedClient {
    ShardedClient::new(cluster.router.clone(), cluster.workers.clone())
}

#[tokio::test]
async fn test_requeue_follows_flag_flipped_during_delay() {
    let cluster = Cluster::new(RuntimeMode::Test);

    let receipt = client(&cluster)
        .perform_in("ShardAWorker", vec![serde_json::json!("x")], Duration::from_secs(60))
        .await
        .expect("scheduled");
    assert_eq!(receipt.shard, "main");
    assert_eq!(cluster.main.scheduled_entries().await.len(), 1);

    cluster.flags.enable_route(SHARD_A);

    let main = cluster.router.registry().main();
    let report = requeuer(&cluster)
        .enqueue_due_jobs_at(main, FAR_FUTURE)
        .await
        .expect("requeue pass");

    assert_eq!(report.dispatched, 1);
    assert_eq!(report.rerouted, 1);
    assert!(cluster.main.queue_contents("shard_a_jobs").await.is_empty());

    let contents = cluster.shard_a.queue_contents("shard_a_jobs").await;
    assert_eq!(contents.len(), 1);
    let job = JobDescriptor::from_payload(&contents[0]).expect("valid payload");
    assert_eq!(job.jid, receipt.jid);
    assert!(cluster.main.scheduled_entries().await.is_empty());
    assert_eq!(cluster.tracker.count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pollers_dispatch_each_job_once() {
    let cluster = Cluster::new(RuntimeMode::Test);
    let mut jids = HashSet::new();
    for i in 0..200 {
        let job = JobDescriptor::new("PlainWorker", "default").with_args(vec![i.into()]);
        jids.insert(job.jid);
        cluster
            .main
            .schedule(&job.to_payload().unwrap(), i as f64)
            .await
            .unwrap();
    }

    let first = Arc::new(requeuer(&cluster).with_batch_size(7));
    let second = Arc::new(requeuer(&cluster).with_batch_size(11));
    let router = cluster.router.clone();

    let (a, b) = tokio::join!(
        {
            let first = first.clone();
            let router = router.clone();
            tokio::spawn(async move {
                first
                    .enqueue_due_jobs_at(router.registry().main(), FAR_FUTURE)
                    .await
            })
        },
        {
            let second = second.clone();
            let router = router.clone();
            tokio::spawn(async move {
                second
                    .enqueue_due_jobs_at(router.registry().main(), FAR_FUTURE)
                    .await
            })
        }
    );
    let a = a.expect("task").expect("pass");
    let b = b.expect("task").expect("pass");

    assert_eq!(a.claimed + b.claimed, 200);
    assert_eq!(a.dispatched + b.dispatched, 200);

    let contents = cluster.main.queue_contents("default").await;
    assert_eq!(contents.len(), 200);
    let dispatched: HashSet<_> = contents
        .iter()
        .map(|payload| JobDescriptor::from_payload(payload).unwrap().jid)
        .collect();
    assert_eq!(dispatched, jids);
    assert!(cluster.main.scheduled_entries().await.is_empty());
}

#[tokio::test]
async fn test_unknown_worker_is_dropped_and_rest_dispatched() {
    let cluster = Cluster::new(RuntimeMode::Test);
    let due = Utc::now() - chrono::Duration::seconds(5);
    let good_a = JobDescriptor::new("PlainWorker", "default").scheduled_at(due);
    let removed = JobDescriptor::new("RemovedWorker", "default").scheduled_at(due);
    let good_b = JobDescriptor::new("ShardBWorker", "shard_b_jobs").scheduled_at(due);

    for (score, job) in [(1.0, &good_a), (2.0, &removed), (3.0, &good_b)] {
        cluster
            .main
            .schedule(&job.to_payload().unwrap(), score)
            .await
            .unwrap();
    }

    let main = cluster.router.registry().main();
    let requeuer = requeuer(&cluster);
    let report = requeuer.enqueue_due_jobs_at(main, 10.0).await.unwrap();

    assert_eq!(report.claimed, 3);
    assert_eq!(report.dispatched, 2);
    assert_eq!(report.dropped, 1);
    assert_eq!(cluster.main.queue_contents("default").await.len(), 1);
    assert_eq!(cluster.shard_b.queue_contents("shard_b_jobs").await.len(), 1);

    let events = cluster.tracker.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].message.contains("RemovedWorker"));
    assert_eq!(events[0].context.get("reason"), Some("unknown_worker"));

    // The dropped entry is gone, so a second pass finds nothing.
    assert!(cluster.main.scheduled_entries().await.is_empty());
    let again = requeuer.enqueue_due_jobs_at(main, 10.0).await.unwrap();
    assert_eq!(again.claimed, 0);
    assert_eq!(cluster.tracker.count(), 1);
}

#[tokio::test]
async fn test_client_enqueue_to_migrated_shard() {
    let cluster = Cluster::new(RuntimeMode::Test);

    let receipt = client(&cluster)
        .perform_async("ShardBWorker", vec![])
        .await
        .expect("enqueued");

    assert_eq!(receipt.shard, SHARD_B);
    assert_eq!(receipt.queue, "shard_b_jobs");
    assert_eq!(cluster.shard_b.queue_contents("shard_b_jobs").await.len(), 1);
    assert_eq!(cluster.tracker.count(), 0);
}

#[tokio::test]
async fn test_poller_round_requeues_every_shard() {
    let cluster = Cluster::new(RuntimeMode::Test);
    let due = Utc::now() - chrono::Duration::seconds(1);
    for backend in [&cluster.main, &cluster.shard_a, &cluster.shard_b] {
        let job = JobDescriptor::new("PlainWorker", "default").scheduled_at(due);
        backend.schedule(&job.to_payload().unwrap(), 1.0).await.unwrap();
    }

    let poller = SchedulePoller::new(PollerConfig::default(), Arc::new(requeuer(&cluster)));
    let reports = poller.poll_once().await;

    assert_eq!(reports.len(), 3);
    // PlainWorker has no store, so everything lands on main.
    assert_eq!(cluster.main.queue_contents("default").await.len(), 3);
    assert_eq!(poller.stats().rerouted, 2);
    for backend in [&cluster.main, &cluster.shard_a, &cluster.shard_b] {
        assert!(backend.scheduled_entries().await.is_empty());
    }
}
