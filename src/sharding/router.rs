//! Routing decision engine.
//!
//! Given the store (shard) name a job declares, decides which shard instance
//! actually receives it:
//!
//! 1. Absent, blank or unregistered names fall back to `main`.
//! 2. `main` routes to `main`.
//! 3. Migrated shards route to themselves without consulting any flag.
//! 4. Otherwise the live `route_to_<shard>` flag decides between the named
//!    shard and `main`.
//!
//! Decisions are recomputed on every call; flag state can change between two
//! calls in the same process. Routing never fails: inconsistencies are
//! reported and degrade to `main`.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, trace};

use super::flags::{route_flag_name, FeatureFlags};
use super::migration::MigrationState;
use super::registry::{ShardInstance, ShardRegistry, MAIN_SHARD};
use super::tracking::{ErrorTracker, TrackingContext};
use crate::error::RoutingConsistencyError;
use crate::metrics::MetricsCollector;

/// Why a decision resolved the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteReason {
    /// No store was requested, or `main` was requested.
    Default,
    /// The requested store is not registered.
    Unknown,
    /// The requested store is permanently migrated.
    Migrated,
    /// The requested store's routing flag is enabled.
    FlagEnabled,
    /// The requested store's routing flag is disabled.
    FlagDisabled,
    /// The store passed the checks but has no backend.
    Inconsistent,
}

impl RouteReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteReason::Default => "default",
            RouteReason::Unknown => "unknown",
            RouteReason::Migrated => "migrated",
            RouteReason::FlagEnabled => "flag_enabled",
            RouteReason::FlagDisabled => "flag_disabled",
            RouteReason::Inconsistent => "inconsistent",
        }
    }
}

impl fmt::Display for RouteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The shard selected for a job at one instant.
#[derive(Debug, Clone, Copy)]
pub struct RoutingDecision<'a> {
    /// Resolved shard name.
    pub shard_name: &'a str,
    /// Handle of the resolved shard.
    pub instance: &'a ShardInstance,
    /// How the decision was reached.
    pub reason: RouteReason,
}

impl RoutingDecision<'_> {
    /// Returns whether the decision resolved to `main`.
    pub fn is_main(&self) -> bool {
        self.shard_name == MAIN_SHARD
    }
}

/// Decides which shard receives a job.
pub struct Router {
    registry: Arc<ShardRegistry>,
    migration: Arc<MigrationState>,
    flags: Arc<dyn FeatureFlags>,
    tracker: Arc<dyn ErrorTracker>,
    metrics: MetricsCollector,
}

impl Router {
    /// Creates a router over the given registry and routing inputs.
    pub fn new(
        registry: Arc<ShardRegistry>,
        migration: Arc<MigrationState>,
        flags: Arc<dyn FeatureFlags>,
        tracker: Arc<dyn ErrorTracker>,
    ) -> Self {
        Self {
            registry,
            migration,
            flags,
            tracker,
            metrics: MetricsCollector::new(),
        }
    }

    /// Resolves the shard for a requested store name.
    pub fn route(&self, requested: Option<&str>) -> RoutingDecision<'_> {
        let Some(name) = requested.map(str::trim).filter(|n| !n.is_empty()) else {
            return self.main_decision("<none>", RouteReason::Default);
        };

        if !self.registry.contains(name) {
            debug!(requested = name, "Unknown shard requested, routing to main");
            return self.main_decision("<unknown>", RouteReason::Unknown);
        }

        if name == MAIN_SHARD {
            return self.main_decision(MAIN_SHARD, RouteReason::Default);
        }

        let reason = if self.migration.is_migrated(name) {
            RouteReason::Migrated
        } else if self.flags.is_enabled(&route_flag_name(name)) {
            RouteReason::FlagEnabled
        } else {
            return self.main_decision(name, RouteReason::FlagDisabled);
        };

        match self.registry.get(name) {
            Some(instance) => self.decision(name, instance, reason),
            None => {
                let err = RoutingConsistencyError {
                    shard: name.to_string(),
                };
                error!(shard = name, reason = %reason, "Routing consistency error");
                self.tracker.track_exception(
                    &err,
                    &TrackingContext::new("router")
                        .with("shard", name)
                        .with("reason", reason.as_str()),
                );
                self.main_decision(name, RouteReason::Inconsistent)
            }
        }
    }

    /// Returns whether more than one shard is configured.
    pub fn sharding_enabled(&self) -> bool {
        self.registry.len() > 1
    }

    /// Returns the shard registry.
    pub fn registry(&self) -> &ShardRegistry {
        &self.registry
    }

    /// Returns the migration state.
    pub fn migration(&self) -> &MigrationState {
        &self.migration
    }

    fn main_decision(&self, requested: &str, reason: RouteReason) -> RoutingDecision<'_> {
        self.decision(requested, self.registry.main(), reason)
    }

    fn decision<'a>(
        &'a self,
        requested: &str,
        instance: &'a ShardInstance,
        reason: RouteReason,
    ) -> RoutingDecision<'a> {
        trace!(
            requested = requested,
            resolved = instance.name(),
            reason = %reason,
            "Routing decision"
        );
        self.metrics
            .record_routing_decision(requested, instance.name(), reason.as_str());

        RoutingDecision {
            shard_name: instance.name(),
            instance,
            reason,
        }
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("registry", &self.registry)
            .field("migration", &self.migration)
            .finish_non_exhaustive()
    }
}
