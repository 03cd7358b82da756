//! Routed job enqueueing and scheduled job requeueing.
//!
//! - **ShardedClient**: pushes or schedules jobs on the shard the router picks
//! - **ScheduledRequeuer**: moves due jobs from a shard's schedule to live
//!   queues, re-routing each one at dispatch time
//! - **SchedulePoller**: runs the requeuer over every shard on an interval
//!
//! # Architecture
//!
//! ```text
//!     perform_async / perform_in
//!                │
//!         ┌──────▼───────┐
//!         │    Router    │
//!         └──────┬───────┘
//!                │ explicit route
//!     ┌──────────┼──────────┐
//!     ▼          ▼          ▼
//! ┌────────┐ ┌────────┐ ┌────────┐
//! │  main  │ │shard a │ │shard b │   queues + schedule
//! └───┬────┘ └───┬────┘ └───┬────┘
//!     └──────────┼──────────┘
//!                │ claim (checks disabled)
//!        ┌───────▼────────┐
//!        │ SchedulePoller │ ──► re-route ──► push
//!        └────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use queue_sharding::scheduler::{PollerConfig, SchedulePoller, ScheduledRequeuer, ShardedClient};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let client = ShardedClient::new(router.clone(), workers.clone());
//! client.perform_in("PostReceive", vec![], Duration::from_secs(60)).await?;
//!
//! let requeuer = Arc::new(ScheduledRequeuer::new(router, workers, tracker));
//! let mut poller = SchedulePoller::new(PollerConfig::default(), requeuer);
//! poller.start()?;
//! // ...
//! poller.shutdown().await?;
//! ```

pub mod client;
pub mod job;
pub mod poller;
pub mod requeuer;
pub mod workers;

pub use client::{EnqueueReceipt, ShardedClient};
pub use job::{now_score, JobDescriptor, DEFAULT_QUEUE};
pub use poller::{PollerConfig, PollerStats, SchedulePoller};
pub use requeuer::{RequeueReport, ScheduledRequeuer, DEFAULT_BATCH_SIZE};
pub use workers::{StaticWorkerRegistry, WorkerOptions, WorkerRegistry};
