//! Shard routing for background jobs.
//!
//! This module decides which queue backend (shard) receives a job and makes
//! sure storage is only touched through an intentional routing decision:
//!
//! - **ShardRegistry**: immutable name -> instance map, always containing `main`
//! - **MigrationState**: shards permanently migrated (no flag check)
//! - **FeatureFlags**: live `route_to_<shard>` decisions for in-progress rollouts
//! - **Router**: the routing decision engine
//! - **AccessGuard**: task-local routing scopes and violation handling
//! - **ErrorTracker**: sink for reported, non-propagated errors
//!
//! # Flow
//!
//! ```text
//!   job(store) ──► Router::route ──► (shard, instance)
//!                                         │
//!                        with_explicit_route(instance, ...)
//!                                         │
//!                                         ▼
//!                       ShardInstance::push ──► AccessGuard::check ──► backend
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use queue_sharding::sharding::{with_explicit_route, Router};
//!
//! let decision = router.route(Some("queues_shard_catchall_a"));
//! with_explicit_route(decision.instance, async {
//!     decision.instance.push("default", &payload).await
//! })
//! .await?;
//! ```

pub mod flags;
pub mod guard;
pub mod migration;
pub mod registry;
pub mod router;
pub mod tracking;

pub use flags::{route_flag_name, FeatureFlags, StaticFeatureFlags};
pub use guard::{
    with_explicit_route, with_explicit_route_sync, with_routing_checks_disabled,
    with_routing_checks_disabled_sync, AccessGuard, AccessScope, RuntimeMode,
};
pub use migration::MigrationState;
pub use registry::{ShardInstance, ShardRegistry, MAIN_SHARD};
pub use router::{RouteReason, Router, RoutingDecision};
pub use tracking::{ErrorTracker, LogTracker, RecordingTracker, TrackedEvent, TrackingContext};
