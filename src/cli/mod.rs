//! Command-line interface for queue-sharding.
//!
//! Provides commands for inspecting routing, enqueueing jobs, polling
//! schedules and reading shard statistics.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
