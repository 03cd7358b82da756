//! Feature-flag collaborator.
//!
//! Shards that are not yet migrated are gated by a per-shard flag named
//! `route_to_<shard>`. Flags are live: the router asks on every decision and
//! never caches the answer.

use std::collections::HashMap;
use std::sync::RwLock;

/// Prefix of every shard routing flag.
pub const ROUTE_FLAG_PREFIX: &str = "route_to_";

/// Returns the routing flag name for a shard.
pub fn route_flag_name(shard: &str) -> String {
    format!("{}{}", ROUTE_FLAG_PREFIX, shard)
}

/// Source of boolean feature decisions.
///
/// Unknown flags must report `false`.
pub trait FeatureFlags: Send + Sync {
    /// Returns whether a flag is currently enabled.
    fn is_enabled(&self, flag: &str) -> bool;
}

/// In-process flag store that can be toggled at runtime.
#[derive(Debug, Default)]
pub struct StaticFeatureFlags {
    flags: RwLock<HashMap<String, bool>>,
}

impl StaticFeatureFlags {
    /// Creates a store with every flag disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with the given flags enabled.
    pub fn with_enabled<I, S>(flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let map = flags.into_iter().map(|f| (f.into(), true)).collect();
        Self {
            flags: RwLock::new(map),
        }
    }

    /// Sets a flag's value.
    pub fn set(&self, flag: impl Into<String>, enabled: bool) {
        self.flags
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(flag.into(), enabled);
    }

    /// Enables a flag.
    pub fn enable(&self, flag: impl Into<String>) {
        self.set(flag, true);
    }

    /// Disables a flag.
    pub fn disable(&self, flag: impl Into<String>) {
        self.set(flag, false);
    }

    /// Enables routing to a shard.
    pub fn enable_route(&self, shard: &str) {
        self.enable(route_flag_name(shard));
    }

    /// Disables routing to a shard.
    pub fn disable_route(&self, shard: &str) {
        self.disable(route_flag_name(shard));
    }
}

impl FeatureFlags for StaticFeatureFlags {
    fn is_enabled(&self, flag: &str) -> bool {
        self.flags
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(flag)
            .copied()
            .unwrap_or(false)
    }
}
