//! Shard registry.
//!
//! Maps shard names to queue backend handles. Built once at startup from the
//! configured endpoints and read-only afterwards, so lookups need no locking.
//! The `main` shard is always present.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::guard::AccessGuard;
use crate::backend::{self, QueueBackend, ScheduledEntry};
use crate::config::ShardingConfig;
use crate::error::{ConfigError, QueueError, RegistryError};

/// Name of the default shard.
pub const MAIN_SHARD: &str = "main";

/// Handle to one shard's queue backend.
///
/// Every storage primitive is checked by the access guard before it reaches
/// the backend. The check runs when the returned future is first polled and
/// reports the location where the future was created. Cloning is cheap and
/// shares the underlying connection.
#[derive(Clone)]
pub struct ShardInstance {
    name: Arc<str>,
    backend: Arc<dyn QueueBackend>,
    guard: Arc<AccessGuard>,
}

impl ShardInstance {
    /// Wraps a backend for the named shard.
    pub fn new(name: &str, backend: Arc<dyn QueueBackend>, guard: Arc<AccessGuard>) -> Self {
        Self {
            name: Arc::from(name),
            backend,
            guard,
        }
    }

    /// Returns the shard name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns whether this is the main shard.
    pub fn is_main(&self) -> bool {
        &*self.name == MAIN_SHARD
    }

    #[track_caller]
    pub fn ping(&self) -> impl Future<Output = Result<(), QueueError>> + Send + '_ {
        let caller = Location::caller();
        async move {
            self.guard.check_at(&self.name, "ping", caller)?;
            self.backend.ping().await
        }
    }

    #[track_caller]
    pub fn push<'a>(
        &'a self,
        queue: &'a str,
        payload: &'a str,
    ) -> impl Future<Output = Result<(), QueueError>> + Send + 'a {
        let caller = Location::caller();
        async move {
            self.guard.check_at(&self.name, "push", caller)?;
            self.backend.push(queue, payload).await
        }
    }

    #[track_caller]
    pub fn pop<'a>(
        &'a self,
        queue: &'a str,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<String>, QueueError>> + Send + 'a {
        let caller = Location::caller();
        async move {
            self.guard.check_at(&self.name, "pop", caller)?;
            self.backend.pop(queue, timeout).await
        }
    }

    #[track_caller]
    pub fn schedule<'a>(
        &'a self,
        payload: &'a str,
        at: f64,
    ) -> impl Future<Output = Result<(), QueueError>> + Send + 'a {
        let caller = Location::caller();
        async move {
            self.guard.check_at(&self.name, "schedule", caller)?;
            self.backend.schedule(payload, at).await
        }
    }

    #[track_caller]
    pub fn due_entries(
        &self,
        now: f64,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ScheduledEntry>, QueueError>> + Send + '_ {
        let caller = Location::caller();
        async move {
            self.guard.check_at(&self.name, "due_entries", caller)?;
            self.backend.due_entries(now, limit).await
        }
    }

    #[track_caller]
    pub fn remove_scheduled<'a>(
        &'a self,
        payload: &'a str,
    ) -> impl Future<Output = Result<bool, QueueError>> + Send + 'a {
        let caller = Location::caller();
        async move {
            self.guard.check_at(&self.name, "remove_scheduled", caller)?;
            self.backend.remove_scheduled(payload).await
        }
    }

    #[track_caller]
    pub fn queue_len<'a>(
        &'a self,
        queue: &'a str,
    ) -> impl Future<Output = Result<usize, QueueError>> + Send + 'a {
        let caller = Location::caller();
        async move {
            self.guard.check_at(&self.name, "queue_len", caller)?;
            self.backend.queue_len(queue).await
        }
    }

    #[track_caller]
    pub fn schedule_len(&self) -> impl Future<Output = Result<usize, QueueError>> + Send + '_ {
        let caller = Location::caller();
        async move {
            self.guard.check_at(&self.name, "schedule_len", caller)?;
            self.backend.schedule_len().await
        }
    }

    #[track_caller]
    pub fn queue_names(
        &self,
    ) -> impl Future<Output = Result<Vec<String>, QueueError>> + Send + '_ {
        let caller = Location::caller();
        async move {
            self.guard.check_at(&self.name, "queue_names", caller)?;
            self.backend.queue_names().await
        }
    }
}

impl fmt::Debug for ShardInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardInstance")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Immutable mapping from shard name to instance.
#[derive(Debug)]
pub struct ShardRegistry {
    instances: BTreeMap<String, ShardInstance>,
    main: ShardInstance,
}

impl ShardRegistry {
    /// Builds a registry from already opened backends.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingMainShard` when no `main` backend is given
    /// and `ConfigError::DuplicateShard` when a name repeats.
    pub fn new<I>(backends: I, guard: Arc<AccessGuard>) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, Arc<dyn QueueBackend>)>,
    {
        let mut instances = BTreeMap::new();
        for (name, backend) in backends {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "shard names cannot be blank".to_string(),
                ));
            }
            if instances.contains_key(&name) {
                return Err(ConfigError::DuplicateShard(name));
            }
            let instance = ShardInstance::new(&name, backend, Arc::clone(&guard));
            instances.insert(name, instance);
        }

        let main = instances
            .get(MAIN_SHARD)
            .cloned()
            .ok_or(ConfigError::MissingMainShard)?;

        Ok(Self { instances, main })
    }

    /// Opens a backend for every configured shard.
    ///
    /// # Errors
    ///
    /// Fails if any shard cannot be opened or the shard list is invalid.
    pub async fn connect(
        config: &ShardingConfig,
        guard: Arc<AccessGuard>,
    ) -> Result<Self, RegistryError> {
        let mut backends = Vec::with_capacity(config.shards.len());
        for endpoint in &config.shards {
            let backend = backend::connect(&endpoint.name, &endpoint.url).await?;
            backends.push((endpoint.name.clone(), backend));
        }

        let registry = Self::new(backends, guard)?;
        info!(shards = ?registry.names().collect::<Vec<_>>(), "Shard registry initialized");
        Ok(registry)
    }

    /// Looks up a shard; `None` when the name is not registered.
    pub fn get(&self, name: &str) -> Option<&ShardInstance> {
        self.instances.get(name)
    }

    /// Returns whether a shard is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    /// Returns the main shard.
    pub fn main(&self) -> &ShardInstance {
        &self.main
    }

    /// Iterates over every shard in name order.
    pub fn instances(&self) -> impl Iterator<Item = &ShardInstance> {
        self.instances.values()
    }

    /// Iterates over every shard name in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.instances.keys().map(String::as_str)
    }

    /// Number of registered shards.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Always false: `main` is always registered.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::sharding::guard::{with_explicit_route, RuntimeMode};
    use crate::sharding::tracking::RecordingTracker;

    fn test_guard() -> Arc<AccessGuard> {
        Arc::new(AccessGuard::new(
            RuntimeMode::Test,
            Arc::new(RecordingTracker::new()),
        ))
    }

    fn memory(name: &str) -> (String, Arc<dyn QueueBackend>) {
        (name.to_string(), Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn test_registry_requires_main() {
        let err = ShardRegistry::new(vec![memory("queues_shard_a")], test_guard()).err();
        assert!(matches!(err, Some(ConfigError::MissingMainShard)));
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let err = ShardRegistry::new(vec![memory("main"), memory("main")], test_guard()).err();
        assert!(matches!(err, Some(ConfigError::DuplicateShard(name)) if name == "main"));
    }

    #[test]
    fn test_registry_lookup() {
        let registry =
            ShardRegistry::new(vec![memory("main"), memory("queues_shard_a")], test_guard())
                .expect("valid registry");

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.main().name(), "main");
        assert!(registry.main().is_main());
        assert!(registry.contains("queues_shard_a"));
        assert!(registry.get("queues_shard_b").is_none());
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["main", "queues_shard_a"]
        );
    }

    #[tokio::test]
    async fn test_unrouted_call_fails_in_test_mode() {
        let registry = ShardRegistry::new(vec![memory("main")], test_guard()).unwrap();
        let result = registry.main().push("default", "{}").await;
        assert!(matches!(result, Err(QueueError::Unrouted(_))));
    }

    #[tokio::test]
    async fn test_routed_call_reaches_backend() {
        let registry = ShardRegistry::new(vec![memory("main")], test_guard()).unwrap();
        let main = registry.main();

        let len = with_explicit_route(main, async {
            main.push("default", "{}").await?;
            main.queue_len("default").await
        })
        .await
        .unwrap();
        assert_eq!(len, 1);
    }
}
