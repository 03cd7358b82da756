//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by queue_sharding and
//! provides functions for initializing, registering, and exporting metrics.

use prometheus::{CounterVec, Encoder, Histogram, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all queue_sharding metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Routing decisions, labeled by requested store, resolved shard and reason.
pub static ROUTING_DECISIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Storage calls made outside a routed scope, labeled by shard, operation and mode.
pub static ROUTING_VIOLATIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Jobs enqueued through the sharded client, labeled by shard and kind.
pub static JOBS_ENQUEUED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Scheduled jobs moved to a live queue, labeled by destination shard.
pub static JOBS_REQUEUED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Claimed scheduled jobs that were dropped, labeled by reason.
pub static JOBS_DROPPED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Duration of one schedule poll over a shard, in seconds.
pub static SCHEDULE_POLL_SECONDS: OnceLock<Histogram> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// This function should be called once at application startup. Recording
/// before initialization is a no-op.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Routing metrics
    let routing_decisions_total = CounterVec::new(
        Opts::new(
            "queue_sharding_routing_decisions_total",
            "Total routing decisions",
        ),
        &["requested", "resolved", "reason"],
    )?;

    let routing_violations_total = CounterVec::new(
        Opts::new(
            "queue_sharding_routing_violations_total",
            "Queue storage calls made outside of a routed scope",
        ),
        &["shard", "operation", "mode"],
    )?;

    // Job metrics
    let jobs_enqueued_total = CounterVec::new(
        Opts::new("queue_sharding_jobs_enqueued_total", "Total jobs enqueued"),
        &["shard", "kind"],
    )?;

    let jobs_requeued_total = CounterVec::new(
        Opts::new(
            "queue_sharding_jobs_requeued_total",
            "Scheduled jobs moved to a live queue",
        ),
        &["shard"],
    )?;

    let jobs_dropped_total = CounterVec::new(
        Opts::new(
            "queue_sharding_jobs_dropped_total",
            "Claimed scheduled jobs that could not be dispatched",
        ),
        &["reason"],
    )?;

    let schedule_poll_seconds = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "queue_sharding_schedule_poll_seconds",
            "Duration of one schedule poll over a shard",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
    )?;

    registry.register(Box::new(routing_decisions_total.clone()))?;
    registry.register(Box::new(routing_violations_total.clone()))?;
    registry.register(Box::new(jobs_enqueued_total.clone()))?;
    registry.register(Box::new(jobs_requeued_total.clone()))?;
    registry.register(Box::new(jobs_dropped_total.clone()))?;
    registry.register(Box::new(schedule_poll_seconds.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = ROUTING_DECISIONS_TOTAL.set(routing_decisions_total);
    let _ = ROUTING_VIOLATIONS_TOTAL.set(routing_violations_total);
    let _ = JOBS_ENQUEUED_TOTAL.set(jobs_enqueued_total);
    let _ = JOBS_REQUEUED_TOTAL.set(jobs_requeued_total);
    let _ = JOBS_DROPPED_TOTAL.set(jobs_dropped_total);
    let _ = SCHEDULE_POLL_SECONDS.set(schedule_poll_seconds);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, returns a
/// comment line describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
