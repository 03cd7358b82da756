//! queue_sharding: shard-aware routing for background job queues.
//!
//! Jobs declare a store (shard) name; the router resolves it against the
//! configured shards, permanently migrated shards and per-shard route flags.
//! A task-scoped access guard flags storage calls that bypass routing, and
//! the schedule poller re-routes delayed jobs when they become due.

// Core modules
pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod scheduler;
pub mod sharding;

// Re-export commonly used types
pub use config::{ShardEndpoint, ShardingConfig};
pub use error::{
    ConfigError, DroppedJobError, PollerError, QueueError, RegistryError, RoutingConsistencyError,
    RoutingViolation,
};
pub use scheduler::{JobDescriptor, SchedulePoller, ScheduledRequeuer, ShardedClient};
pub use sharding::{AccessGuard, RouteReason, Router, RoutingDecision, RuntimeMode, ShardRegistry};
