//! CLI command definitions for queue-sharding.
//!
//! Every command builds the same routing context from the process
//! environment (see `ShardingConfig::from_env`) and then acts on it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ShardingConfig;
use crate::error::PollerError;
use crate::metrics::{export_metrics, init_metrics};
use crate::scheduler::{
    PollerConfig, RequeueReport, SchedulePoller, ScheduledRequeuer, ShardedClient,
    StaticWorkerRegistry, WorkerRegistry,
};
use crate::sharding::{
    with_routing_checks_disabled, AccessGuard, ErrorTracker, LogTracker, MigrationState, Router,
    ShardRegistry, StaticFeatureFlags,
};

/// Shard-aware job queue router.
#[derive(Parser)]
#[command(name = "queue-sharding")]
#[command(about = "Route, enqueue and requeue jobs across queue shards")]
#[command(version)]
#[command(
    long_about = "queue-sharding routes background jobs to one of several queue shards.\n\nShards, migrated shards and enabled route flags are read from QUEUE_* environment variables.\n\nExample usage:\n  QUEUE_SHARDS=main=redis://localhost:6379,queues_shard_a=redis://localhost:6380 queue-sharding route queues_shard_a"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Show which shard each store name routes to right now.
    Route(RouteArgs),

    /// Enqueue a job through the router.
    Enqueue(EnqueueArgs),

    /// Move due scheduled jobs to live queues on every shard.
    Poll(PollArgs),

    /// Show queue and schedule sizes per shard.
    Stats(StatsArgs),

    /// Run one poll round and print the Prometheus exposition.
    Metrics,
}

/// Arguments for `queue-sharding route`.
#[derive(Parser, Debug)]
pub struct RouteArgs {
    /// Store names to route; none routes the default store.
    pub stores: Vec<String>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `queue-sharding enqueue`.
#[derive(Parser, Debug)]
pub struct EnqueueArgs {
    /// Worker class to enqueue.
    pub class: String,

    /// Job arguments as a JSON array.
    #[arg(long, default_value = "[]")]
    pub args: String,

    /// Delay in seconds before the job is due.
    #[arg(long = "in")]
    pub delay_secs: Option<u64>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `queue-sharding poll`.
#[derive(Parser, Debug)]
pub struct PollArgs {
    /// Run a single poll round and exit.
    #[arg(long)]
    pub once: bool,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `queue-sharding stats`.
#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    init_metrics().context("Failed to initialize metrics")?;

    match cli.command {
        Commands::Route(args) => run_route_command(args).await,
        Commands::Enqueue(args) => run_enqueue_command(args).await,
        Commands::Poll(args) => run_poll_command(args).await,
        Commands::Stats(args) => run_stats_command(args).await,
        Commands::Metrics => run_metrics_command().await,
    }
}

/// Everything a command needs, built once from the environment.
struct ShardingContext {
    config: ShardingConfig,
    router: Arc<Router>,
    tracker: Arc<dyn ErrorTracker>,
    workers: Arc<dyn WorkerRegistry>,
}

impl ShardingContext {
    async fn from_env() -> anyhow::Result<Self> {
        let config = ShardingConfig::from_env().context("Invalid sharding configuration")?;
        let tracker: Arc<dyn ErrorTracker> = Arc::new(LogTracker);
        let guard = Arc::new(AccessGuard::new(config.runtime_mode, tracker.clone()));
        let registry = ShardRegistry::connect(&config, guard)
            .await
            .context("Failed to connect shard backends")?;

        let migration = MigrationState::new(config.migrated_shards.clone());
        let flags = StaticFeatureFlags::with_enabled(config.enabled_flags.iter().cloned());
        let router = Arc::new(Router::new(
            Arc::new(registry),
            Arc::new(migration),
            Arc::new(flags),
            tracker.clone(),
        ));

        let workers: Arc<dyn WorkerRegistry> = match &config.workers_file {
            Some(path) => Arc::new(
                StaticWorkerRegistry::from_yaml_file(path)
                    .with_context(|| format!("Failed to load workers from {}", path.display()))?,
            ),
            None => Arc::new(StaticWorkerRegistry::new()),
        };

        info!(
            shards = router.registry().len(),
            mode = %config.runtime_mode,
            sharding_enabled = router.sharding_enabled(),
            "Routing context ready"
        );

        Ok(Self {
            config,
            router,
            tracker,
            workers,
        })
    }

    fn requeuer(&self) -> Arc<ScheduledRequeuer> {
        Arc::new(
            ScheduledRequeuer::new(
                self.router.clone(),
                self.workers.clone(),
                self.tracker.clone(),
            )
            .with_batch_size(self.config.poll_batch_size),
        )
    }

    fn poller(&self) -> SchedulePoller {
        SchedulePoller::new(
            PollerConfig::default().with_poll_interval(self.config.poll_interval),
            self.requeuer(),
        )
    }
}

#[derive(Debug, Serialize)]
struct RouteOutput {
    requested: Option<String>,
    shard: String,
    reason: String,
}

async fn run_route_command(args: RouteArgs) -> anyhow::Result<()> {
    let ctx = ShardingContext::from_env().await?;

    let requested: Vec<Option<String>> = if args.stores.is_empty() {
        vec![None]
    } else {
        args.stores.into_iter().map(Some).collect()
    };

    let output: Vec<RouteOutput> = requested
        .into_iter()
        .map(|store| {
            let decision = ctx.router.route(store.as_deref());
            RouteOutput {
                shard: decision.shard_name.to_string(),
                reason: decision.reason.to_string(),
                requested: store,
            }
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for route in &output {
        println!(
            "{:<32} -> {:<32} ({})",
            route.requested.as_deref().unwrap_or("<default>"),
            route.shard,
            route.reason
        );
    }
    Ok(())
}

async fn run_enqueue_command(args: EnqueueArgs) -> anyhow::Result<()> {
    let ctx = ShardingContext::from_env().await?;
    let job_args: Vec<serde_json::Value> =
        serde_json::from_str(&args.args).context("--args must be a JSON array")?;

    let client = ShardedClient::new(ctx.router.clone(), ctx.workers.clone());
    let receipt = match args.delay_secs {
        Some(secs) => {
            client
                .perform_in(&args.class, job_args, Duration::from_secs(secs))
                .await?
        }
        None => client.perform_async(&args.class, job_args).await?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&receipt)?);
    } else {
        println!(
            "Enqueued {} ({}) on shard '{}' queue '{}'{}",
            args.class,
            receipt.jid,
            receipt.shard,
            receipt.queue,
            if receipt.scheduled { " [scheduled]" } else { "" }
        );
    }
    Ok(())
}

async fn run_poll_command(args: PollArgs) -> anyhow::Result<()> {
    let ctx = ShardingContext::from_env().await?;
    let mut poller = ctx.poller();

    if args.once {
        let reports = poller.poll_once().await;
        print_reports(&reports, args.json)?;
        return Ok(());
    }

    poller.start()?;
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    match poller.shutdown().await {
        Err(PollerError::ShutdownTimeout(timeout)) => {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Poll round still running after shutdown timeout, waiting for it to finish"
            );
            poller.wait().await?;
        }
        other => other?,
    }

    let stats = poller.stats();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("\n=== Schedule Poller ===");
        println!("Polls:      {}", stats.polls);
        println!("Dispatched: {}", stats.dispatched);
        println!("Rerouted:   {}", stats.rerouted);
        println!("Dropped:    {}", stats.dropped);
        println!("Returned:   {}", stats.returned);
        println!("Errors:     {}", stats.errors);
    }
    Ok(())
}

fn print_reports(reports: &[RequeueReport], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(reports)?);
        return Ok(());
    }

    for report in reports {
        println!(
            "{:<32} claimed={} dispatched={} rerouted={} dropped={} returned={} contended={}",
            report.shard,
            report.claimed,
            report.dispatched,
            report.rerouted,
            report.dropped,
            report.returned,
            report.contended
        );
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct ShardStats {
    shard: String,
    scheduled: usize,
    queues: Vec<QueueStats>,
}

#[derive(Debug, Serialize)]
struct QueueStats {
    name: String,
    size: usize,
}

async fn run_stats_command(args: StatsArgs) -> anyhow::Result<()> {
    let ctx = ShardingContext::from_env().await?;

    let mut output = Vec::with_capacity(ctx.router.registry().len());
    for instance in ctx.router.registry().instances() {
        // Inspection reads every shard directly, not a routed job.
        let stats = with_routing_checks_disabled(async {
            let scheduled = instance.schedule_len().await?;
            let mut queues = Vec::new();
            for name in instance.queue_names().await? {
                let size = instance.queue_len(&name).await?;
                queues.push(QueueStats { name, size });
            }
            Ok::<_, crate::error::QueueError>(ShardStats {
                shard: instance.name().to_string(),
                scheduled,
                queues,
            })
        })
        .await
        .with_context(|| format!("Failed to read stats for shard '{}'", instance.name()))?;
        output.push(stats);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for shard in &output {
        println!("{} (scheduled: {})", shard.shard, shard.scheduled);
        for queue in &shard.queues {
            println!("  {:<30} {}", queue.name, queue.size);
        }
    }
    Ok(())
}

async fn run_metrics_command() -> anyhow::Result<()> {
    let ctx = ShardingContext::from_env().await?;
    ctx.poller().poll_once().await;
    print!("{}", export_metrics());
    Ok(())
}
