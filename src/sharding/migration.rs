//! Permanently migrated shards.
//!
//! A migrated shard has graduated out of the flag-gated rollout path and is
//! routed to unconditionally. The set comes from a startup declaration (a
//! JSON array of shard names), is parsed lazily on first use and never
//! changes afterwards; removing a name requires a restart.

use std::collections::HashSet;
use std::sync::OnceLock;

use tracing::{debug, warn};

/// Read-only set of migrated shard names.
#[derive(Debug, Default)]
pub struct MigrationState {
    /// Raw declaration as supplied at startup.
    declaration: Option<String>,
    /// Parsed set, computed once.
    migrated: OnceLock<HashSet<String>>,
}

impl MigrationState {
    /// Creates the state from a raw JSON-array declaration.
    ///
    /// Parsing is deferred until the first lookup.
    pub fn new(declaration: Option<String>) -> Self {
        Self {
            declaration,
            migrated: OnceLock::new(),
        }
    }

    /// Creates the state from an already known list of names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: HashSet<String> = names.into_iter().map(Into::into).collect();
        let migrated = OnceLock::new();
        let _ = migrated.set(set);
        Self {
            declaration: None,
            migrated,
        }
    }

    /// Returns whether a shard is permanently migrated.
    pub fn is_migrated(&self, shard: &str) -> bool {
        self.migrated_shards().contains(shard)
    }

    /// Returns the full migrated set.
    pub fn migrated_shards(&self) -> &HashSet<String> {
        self.migrated
            .get_or_init(|| parse_declaration(self.declaration.as_deref()))
    }
}

/// Parses a migration declaration.
///
/// Anything that is not a JSON array of strings yields an empty set, which
/// keeps every shard on the flag-gated path.
pub fn parse_declaration(raw: Option<&str>) -> HashSet<String> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return HashSet::new();
    };

    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(names) => {
            let set: HashSet<String> = names
                .into_iter()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect();
            debug!(migrated = ?set, "Parsed migrated shard declaration");
            set
        }
        Err(e) => {
            warn!(
                error = %e,
                declaration = raw,
                "Malformed migrated shard declaration, treating as empty"
            );
            HashSet::new()
        }
    }
}
