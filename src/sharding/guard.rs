//! Routing discipline for queue storage access.
//!
//! Every storage primitive on a [`ShardInstance`] first asks the
//! [`AccessGuard`] whether the current task is inside an intentionally
//! routed scope. Two scopes qualify:
//!
//! - **Explicit route**: entered with [`with_explicit_route`] after a routing
//!   decision picked the instance.
//! - **Routing checks disabled**: entered with [`with_routing_checks_disabled`]
//!   for administrative work that deliberately ignores per-job routing, such
//!   as polling a shard's own schedule.
//!
//! Scope markers live in task-local storage. They are set on entry and the
//! previous value is restored on every exit path (return, error, panic, or a
//! dropped future), so nested scopes compose and concurrent tasks never see
//! each other's markers.
//!
//! # Violations
//!
//! A call outside both scopes is a discipline violation. It is always handed
//! to the error tracker; it is returned as an error only when the runtime mode
//! raises on violations (development and test). Production traffic is never
//! blocked by a violation.

use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::registry::ShardInstance;
use super::tracking::{ErrorTracker, TrackingContext};
use crate::error::RoutingViolation;
use crate::metrics::MetricsCollector;

tokio::task_local! {
    /// Shard name of the enclosing explicit route, if any.
    static EXPLICIT_ROUTE: Option<String>;
    /// Whether the enclosing scope opted out of routing checks.
    static ROUTING_CHECKS_DISABLED: bool;
}

/// Classification of the running process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    #[default]
    Production,
    Staging,
    Development,
    Test,
}

impl RuntimeMode {
    /// Returns whether violations are returned as errors in this mode.
    ///
    /// Only development and test raise; every other mode is production-like.
    pub fn raises_on_violation(&self) -> bool {
        matches!(self, RuntimeMode::Development | RuntimeMode::Test)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeMode::Production => "production",
            RuntimeMode::Staging => "staging",
            RuntimeMode::Development => "development",
            RuntimeMode::Test => "test",
        }
    }
}

impl fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" => Ok(RuntimeMode::Production),
            "staging" => Ok(RuntimeMode::Staging),
            "development" => Ok(RuntimeMode::Development),
            "test" => Ok(RuntimeMode::Test),
            other => Err(format!("unknown runtime mode '{}'", other)),
        }
    }
}

/// Snapshot of the current task's routing scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessScope {
    /// Shard of the innermost explicit route.
    pub explicit_route: Option<String>,
    /// Whether routing checks are disabled.
    pub checks_disabled: bool,
}

impl AccessScope {
    /// Reads the scope of the current task or thread.
    ///
    /// Outside of any scope this is the default (no route, checks enabled).
    pub fn current() -> Self {
        Self {
            explicit_route: EXPLICIT_ROUTE.try_with(Clone::clone).ok().flatten(),
            checks_disabled: ROUTING_CHECKS_DISABLED.try_with(|v| *v).unwrap_or(false),
        }
    }

    /// Returns whether storage may be touched from this scope.
    pub fn permits_storage_access(&self) -> bool {
        self.explicit_route.is_some() || self.checks_disabled
    }
}

/// Runs a future inside an explicit route to `instance`.
pub async fn with_explicit_route<F>(instance: &ShardInstance, future: F) -> F::Output
where
    F: Future,
{
    EXPLICIT_ROUTE
        .scope(Some(instance.name().to_string()), future)
        .await
}

/// Runs a closure inside an explicit route to `instance`.
pub fn with_explicit_route_sync<R>(instance: &ShardInstance, f: impl FnOnce() -> R) -> R {
    EXPLICIT_ROUTE.sync_scope(Some(instance.name().to_string()), f)
}

/// Runs a future with routing checks disabled.
pub async fn with_routing_checks_disabled<F>(future: F) -> F::Output
where
    F: Future,
{
    ROUTING_CHECKS_DISABLED.scope(true, future).await
}

/// Runs a closure with routing checks disabled.
pub fn with_routing_checks_disabled_sync<R>(f: impl FnOnce() -> R) -> R {
    ROUTING_CHECKS_DISABLED.sync_scope(true, f)
}

/// Enforces that storage calls happen inside a routed scope.
pub struct AccessGuard {
    mode: RuntimeMode,
    tracker: Arc<dyn ErrorTracker>,
    metrics: MetricsCollector,
}

impl AccessGuard {
    /// Creates a guard for the given runtime mode.
    pub fn new(mode: RuntimeMode, tracker: Arc<dyn ErrorTracker>) -> Self {
        Self {
            mode,
            tracker,
            metrics: MetricsCollector::new(),
        }
    }

    /// Returns the runtime mode.
    pub fn mode(&self) -> RuntimeMode {
        self.mode
    }

    /// Checks the current scope before a storage primitive runs.
    ///
    /// A violation records the location of the caller.
    ///
    /// # Errors
    ///
    /// Returns the violation only when the runtime mode raises on violations.
    #[track_caller]
    pub fn check(&self, shard: &str, operation: &'static str) -> Result<(), RoutingViolation> {
        self.check_at(shard, operation, Location::caller())
    }

    /// Like [`check`](Self::check), with the call site captured elsewhere.
    ///
    /// Storage futures capture the location when they are created and check
    /// when first polled, inside whatever scope the caller entered.
    pub fn check_at(
        &self,
        shard: &str,
        operation: &'static str,
        location: &'static Location<'static>,
    ) -> Result<(), RoutingViolation> {
        if AccessScope::current().permits_storage_access() {
            return Ok(());
        }

        self.track_and_raise_for_dev_exception(RoutingViolation {
            shard: shard.to_string(),
            operation,
            location,
        })
    }

    /// Records a violation and returns it if this runtime raises.
    pub fn track_and_raise_for_dev_exception(
        &self,
        violation: RoutingViolation,
    ) -> Result<(), RoutingViolation> {
        let context = TrackingContext::new("access_guard")
            .with("shard", violation.shard.clone())
            .with("operation", violation.operation)
            .with("runtime_mode", self.mode.as_str())
            .with("location", violation.location.to_string())
            .with(
                "thread",
                std::thread::current().name().unwrap_or("unnamed").to_string(),
            );

        self.tracker.track_exception(&violation, &context);
        self.metrics
            .record_routing_violation(&violation.shard, violation.operation, self.mode.as_str());

        if self.mode.raises_on_violation() {
            Err(violation)
        } else {
            warn!(
                shard = %violation.shard,
                operation = violation.operation,
                location = %violation.location,
                mode = %self.mode,
                "Unrouted queue storage call"
            );
            Ok(())
        }
    }
}

impl fmt::Debug for AccessGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessGuard")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
