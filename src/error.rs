//! Error types for queue sharding operations.
//!
//! Defines the error taxonomy for every subsystem:
//! - Startup configuration (shard endpoints, migration declaration, runtime mode)
//! - Queue backend access (connection, redis protocol, payload serialization)
//! - Routing discipline violations raised by the access guard
//! - Jobs dropped by the scheduled requeuer
//! - Schedule poller lifecycle

use std::panic::Location;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while loading or validating startup configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Shard 'main' must be declared")]
    MissingMainShard,

    #[error("Shard '{0}' is declared more than once")]
    DuplicateShard(String),

    #[error("Failed to read shard file '{path}': {message}")]
    ShardFile { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors that can occur while talking to a queue backend.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to the backend.
    #[error("Backend connection failed for shard '{shard}': {message}")]
    ConnectionFailed { shard: String, message: String },

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Failed to serialize or deserialize a job payload.
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// The shard URL uses a scheme no backend understands.
    #[error("Unsupported backend URL '{0}': expected redis://, rediss:// or memory://")]
    UnsupportedScheme(String),

    /// The call reached the backend without an explicit routing decision.
    #[error(transparent)]
    Unrouted(#[from] RoutingViolation),

    /// No worker definition is registered for the job class.
    #[error("Worker class '{0}' is not registered")]
    UnknownWorker(String),

    /// The requested delay does not fit a timestamp.
    #[error("Delay {0:?} is out of range")]
    InvalidDelay(Duration),
}

/// Errors that can occur while building the shard registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid shard configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to open shard backend: {0}")]
    Backend(#[from] QueueError),
}

/// A storage operation that bypassed routing.
///
/// Recorded on every occurrence; returned to the caller only when the
/// runtime mode raises on violations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Queue storage call '{operation}' on shard '{shard}' at {location} was made outside of an explicit route or a routing-checks-disabled scope")]
pub struct RoutingViolation {
    /// Shard whose storage was touched.
    pub shard: String,
    /// Storage primitive that was invoked.
    pub operation: &'static str,
    /// Source location of the storage call.
    pub location: &'static Location<'static>,
}

/// Registry and routing inputs disagree about a shard.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Shard '{shard}' passed routing checks but has no registered backend; degrading to main")]
pub struct RoutingConsistencyError {
    pub shard: String,
}

/// Reasons a claimed scheduled entry is dropped instead of dispatched.
#[derive(Debug, Error)]
pub enum DroppedJobError {
    /// The payload is not a valid job descriptor.
    #[error("Scheduled entry on shard '{shard}' is not a valid job: {source}")]
    Malformed {
        shard: String,
        #[source]
        source: serde_json::Error,
    },

    /// The job class is not known to this process.
    #[error("Scheduled job {jid} references unknown worker class '{class}'")]
    UnknownWorker { jid: String, class: String },

    /// Dispatch failed and the job could not be returned to the schedule.
    #[error("Claimed job {jid} could not be dispatched or rescheduled: {message}")]
    Lost { jid: String, message: String },
}

/// Errors from the schedule poller lifecycle.
#[derive(Debug, Error)]
pub enum PollerError {
    #[error("Poller is already running")]
    AlreadyRunning,

    #[error("Poller is not running")]
    NotRunning,

    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}
