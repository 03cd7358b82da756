//! Error-tracking sink.
//!
//! Routing faults that must never reach caller code (discipline violations in
//! production, dropped scheduled jobs, registry inconsistencies) are handed to
//! an [`ErrorTracker`] instead. The default tracker logs through `tracing`;
//! [`RecordingTracker`] keeps every event in memory for assertions.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::error;

/// Where a tracked error was raised and what it concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingContext {
    /// Component reporting the error (e.g. "access_guard").
    pub component: &'static str,
    /// Extra key/value context such as shard, operation or job id.
    pub fields: BTreeMap<&'static str, String>,
}

impl TrackingContext {
    /// Creates an empty context for a component.
    pub fn new(component: &'static str) -> Self {
        Self {
            component,
            fields: BTreeMap::new(),
        }
    }

    /// Adds a context field.
    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.fields.insert(key, value.into());
        self
    }

    /// Returns a context field.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

/// Sink for errors that are reported rather than propagated.
pub trait ErrorTracker: Send + Sync {
    /// Records an error together with its call-site context.
    fn track_exception(&self, error: &(dyn std::error::Error + 'static), context: &TrackingContext);
}

/// Tracker that writes every event to the `tracing` error log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTracker;

impl ErrorTracker for LogTracker {
    fn track_exception(&self, err: &(dyn std::error::Error + 'static), context: &TrackingContext) {
        error!(
            component = context.component,
            error = %err,
            context = ?context.fields,
            "Tracked exception"
        );
    }
}

/// A single event captured by [`RecordingTracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedEvent {
    /// Display form of the error.
    pub message: String,
    /// Context supplied by the reporter.
    pub context: TrackingContext,
}

/// Tracker that stores events in memory.
#[derive(Debug, Default)]
pub struct RecordingTracker {
    events: Mutex<Vec<TrackedEvent>>,
}

impl RecordingTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every event recorded so far.
    pub fn events(&self) -> Vec<TrackedEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of events recorded so far.
    pub fn count(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Number of events reported by one component.
    pub fn count_for(&self, component: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|e| e.context.component == component)
            .count()
    }
}

impl ErrorTracker for RecordingTracker {
    fn track_exception(&self, err: &(dyn std::error::Error + 'static), context: &TrackingContext) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(TrackedEvent {
                message: err.to_string(),
                context: context.clone(),
            });
    }
}
