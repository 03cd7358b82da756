//! Metrics module for Prometheus-based monitoring.
//!
//! Routing decisions are the main observability output of this crate: every
//! decision is counted with its requested store, resolved shard and reason,
//! alongside violation, enqueue, requeue and drop counters.
//!
//! # Example
//!
//! ```ignore
//! use queue_sharding::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_requeue("queues_shard_catchall_a");
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{EnqueueKind, MetricsCollector};
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    JOBS_DROPPED_TOTAL, JOBS_ENQUEUED_TOTAL, JOBS_REQUEUED_TOTAL, REGISTRY,
    ROUTING_DECISIONS_TOTAL, ROUTING_VIOLATIONS_TOTAL, SCHEDULE_POLL_SECONDS,
};
