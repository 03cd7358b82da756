//! Worker definitions.
//!
//! The worker registry is the source of per-class routing metadata: the
//! queue a class runs on and the store (shard) it declares. The requeuer
//! consults it at requeue time, so a class whose store changed since the job
//! was scheduled is routed by its current definition.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use super::job::DEFAULT_QUEUE;
use crate::error::ConfigError;

/// Static routing metadata of a worker class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerOptions {
    /// Queue the class runs on.
    #[serde(default = "default_queue")]
    pub queue: String,
    /// Declared store; absent means the default shard.
    #[serde(default)]
    pub store: Option<String>,
}

fn default_queue() -> String {
    DEFAULT_QUEUE.to_string()
}

impl WorkerOptions {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            store: None,
        }
    }

    /// Sets the declared store.
    pub fn with_store(mut self, store: impl Into<String>) -> Self {
        self.store = Some(store.into());
        self
    }
}

/// Lookup of worker metadata by class name.
pub trait WorkerRegistry: Send + Sync {
    /// Returns the options of a class, or `None` if the class is unknown.
    fn lookup(&self, class: &str) -> Option<WorkerOptions>;
}

/// In-process worker registry.
#[derive(Debug, Default)]
pub struct StaticWorkerRegistry {
    workers: RwLock<HashMap<String, WorkerOptions>>,
}

impl StaticWorkerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry from class/options pairs.
    pub fn with_workers<I, S>(workers: I) -> Self
    where
        I: IntoIterator<Item = (S, WorkerOptions)>,
        S: Into<String>,
    {
        let map = workers
            .into_iter()
            .map(|(class, options)| (class.into(), options))
            .collect();
        Self {
            workers: RwLock::new(map),
        }
    }

    /// Loads a registry from a YAML map of class name to options.
    ///
    /// ```yaml
    /// PostReceive:
    ///   queue: post_receive
    ///   store: queues_shard_catchall_a
    /// ```
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let workers: HashMap<String, WorkerOptions> = serde_yaml::from_str(&content)?;
        Ok(Self {
            workers: RwLock::new(workers),
        })
    }

    /// Registers or replaces a class.
    pub fn register(&self, class: impl Into<String>, options: WorkerOptions) {
        self.workers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(class.into(), options);
    }

    /// Removes a class.
    pub fn remove(&self, class: &str) -> Option<WorkerOptions> {
        self.workers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(class)
    }

    /// Number of registered classes.
    pub fn len(&self) -> usize {
        self.workers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl WorkerRegistry for StaticWorkerRegistry {
    fn lookup(&self, class: &str) -> Option<WorkerOptions> {
        self.workers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(class)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_register_lookup_remove() {
        let registry = StaticWorkerRegistry::new();
        assert!(registry.is_empty());

        registry.register(
            "PostReceive",
            WorkerOptions::new("post_receive").with_store("queues_shard_a"),
        );
        let options = registry.lookup("PostReceive").expect("registered");
        assert_eq!(options.queue, "post_receive");
        assert_eq!(options.store.as_deref(), Some("queues_shard_a"));

        assert!(registry.remove("PostReceive").is_some());
        assert!(registry.lookup("PostReceive").is_none());
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "PostReceive:\n  queue: post_receive\n  store: queues_shard_a\nCleanup: {{}}"
        )
        .expect("write");

        let registry = StaticWorkerRegistry::from_yaml_file(file.path()).expect("parses");
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.lookup("PostReceive"),
            Some(WorkerOptions::new("post_receive").with_store("queues_shard_a"))
        );
        assert_eq!(registry.lookup("Cleanup"), Some(WorkerOptions::new("default")));
    }
}
