//! Background schedule poller.
//!
//! Runs the requeuer over every registered shard on a fixed interval until a
//! shutdown signal arrives. Several processes may poll the same shards at
//! once; the claim in the requeuer keeps dispatch to exactly one of them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::requeuer::{RequeueReport, ScheduledRequeuer};
use crate::error::PollerError;
use crate::metrics::MetricsCollector;

/// Configuration for the schedule poller.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Time between polls.
    pub poll_interval: Duration,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl PollerConfig {
    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Cumulative poller statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollerStats {
    /// Completed poll rounds.
    pub polls: u64,
    /// Jobs pushed onto live queues.
    pub dispatched: u64,
    /// Dispatched jobs that changed shard.
    pub rerouted: u64,
    /// Claimed entries dropped.
    pub dropped: u64,
    /// Claimed jobs returned to the schedule.
    pub returned: u64,
    /// Shard passes that failed with a backend error.
    pub errors: u64,
}

struct SharedPollerStats {
    polls: AtomicU64,
    dispatched: AtomicU64,
    rerouted: AtomicU64,
    dropped: AtomicU64,
    returned: AtomicU64,
    errors: AtomicU64,
}

impl SharedPollerStats {
    fn new() -> Self {
        Self {
            polls: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            rerouted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            returned: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    fn record_report(&self, report: &RequeueReport) {
        self.dispatched.fetch_add(report.dispatched, Ordering::SeqCst);
        self.rerouted.fetch_add(report.rerouted, Ordering::SeqCst);
        self.dropped.fetch_add(report.dropped, Ordering::SeqCst);
        self.returned.fetch_add(report.returned, Ordering::SeqCst);
    }

    fn to_poller_stats(&self) -> PollerStats {
        PollerStats {
            polls: self.polls.load(Ordering::SeqCst),
            dispatched: self.dispatched.load(Ordering::SeqCst),
            rerouted: self.rerouted.load(Ordering::SeqCst),
            dropped: self.dropped.load(Ordering::SeqCst),
            returned: self.returned.load(Ordering::SeqCst),
            errors: self.errors.load(Ordering::SeqCst),
        }
    }
}

/// Polls every shard's schedule on an interval.
pub struct SchedulePoller {
    config: PollerConfig,
    requeuer: Arc<ScheduledRequeuer>,
    shutdown_tx: broadcast::Sender<()>,
    handle: Option<JoinHandle<()>>,
    stats: Arc<SharedPollerStats>,
    is_running: AtomicBool,
}

impl SchedulePoller {
    pub fn new(config: PollerConfig, requeuer: Arc<ScheduledRequeuer>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            requeuer,
            shutdown_tx,
            handle: None,
            stats: Arc::new(SharedPollerStats::new()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Runs one poll round over all shards and returns the per-shard reports.
    ///
    /// Shards whose pass failed are logged and left out of the result.
    pub async fn poll_once(&self) -> Vec<RequeueReport> {
        poll_all_shards(&self.requeuer, &self.stats).await
    }

    /// Starts the background polling task.
    ///
    /// # Errors
    ///
    /// Returns `PollerError::AlreadyRunning` if the poller was started before.
    pub fn start(&mut self) -> Result<(), PollerError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PollerError::AlreadyRunning);
        }

        let requeuer = Arc::clone(&self.requeuer);
        let stats = Arc::clone(&self.stats);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let poll_interval = self.config.poll_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            info!(interval_ms = poll_interval.as_millis() as u64, "Schedule poller started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Schedule poller received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        poll_all_shards(&requeuer, &stats).await;
                    }
                }
            }
            info!("Schedule poller stopped");
        });

        self.handle = Some(handle);
        self.is_running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Signals the polling task to stop and waits for the current round.
    ///
    /// On timeout the task keeps running and the poller stays marked as
    /// running; call [`wait`](Self::wait) to let the round finish. Dropping
    /// the task mid-round can lose a claimed job.
    ///
    /// # Errors
    ///
    /// Returns `PollerError::NotRunning` if the poller was never started, or
    /// `PollerError::ShutdownTimeout` if the round does not finish in time.
    pub async fn shutdown(&mut self) -> Result<(), PollerError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PollerError::NotRunning);
        }

        info!("Initiating schedule poller shutdown");
        // The task may already have exited.
        let _ = self.shutdown_tx.send(());

        if let Some(mut handle) = self.handle.take() {
            match tokio::time::timeout(self.config.shutdown_timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "Schedule poller task panicked during shutdown");
                }
                Err(_) => {
                    self.handle = Some(handle);
                    return Err(PollerError::ShutdownTimeout(self.config.shutdown_timeout));
                }
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Waits without a deadline for a signalled polling task to exit.
    ///
    /// # Errors
    ///
    /// Returns `PollerError::NotRunning` if the poller is not running.
    pub async fn wait(&mut self) -> Result<(), PollerError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PollerError::NotRunning);
        }

        // A second signal is harmless if the first was already received.
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Schedule poller task panicked during shutdown");
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!("Schedule poller drained");
        Ok(())
    }

    /// Returns cumulative statistics.
    pub fn stats(&self) -> PollerStats {
        self.stats.to_poller_stats()
    }

    /// Returns whether the background task is running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}

async fn poll_all_shards(
    requeuer: &ScheduledRequeuer,
    stats: &SharedPollerStats,
) -> Vec<RequeueReport> {
    let started = Instant::now();
    let registry = requeuer.router().registry();

    let passes = registry
        .instances()
        .map(|instance| async move { (instance.name(), requeuer.enqueue_due_jobs(instance).await) });
    let results = join_all(passes).await;

    let mut reports = Vec::with_capacity(results.len());
    for (shard, result) in results {
        match result {
            Ok(report) => {
                stats.record_report(&report);
                reports.push(report);
            }
            Err(e) => {
                stats.errors.fetch_add(1, Ordering::SeqCst);
                warn!(shard = shard, error = %e, "Schedule poll failed");
            }
        }
    }

    stats.polls.fetch_add(1, Ordering::SeqCst);
    let elapsed = started.elapsed();
    MetricsCollector::new().record_poll_duration(elapsed.as_secs_f64());
    debug!(shards = reports.len(), elapsed_ms = elapsed.as_millis() as u64, "Poll round complete");

    reports
}
