//! Tidemark simulation driver.
//!
//! Runs the progress coordinator against an in-memory coordination store and
//! log source with random traffic, planning and committing a number of
//! batches. Halfway through (or at `--cap-change-at`) a new per-batch cap is
//! published through the dynamic-config document.
//!
//! # Usage
//!
//! ```bash
//! tidemark-sim --seed 7 --shards 4 --batches 20 --cap 500 --new-cap 2000
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use tidemark_coord::{CoordSessions, SimulatedConnector, SimulatedCoordStore};
use tidemark_core::{now_epoch_secs, BatchId};
use tidemark_planner::config::keys;
use tidemark_planner::{ProgressCoordinator, SourceOptions, DYNAMIC_CONFIG_PATH_DEFAULT};
use tidemark_source::{LogSource, SimulatedLogSource, SimulatedSourceConnector, SourceClients};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Tidemark simulation driver.
#[derive(Parser, Debug)]
#[command(name = "tidemark-sim")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Seed for traffic generation and fault injection.
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Number of shards in the simulated log.
    #[arg(long, default_value = "4")]
    shards: u64,

    /// Seconds of traffic to generate.
    #[arg(long, default_value = "600")]
    seconds: u64,

    /// Maximum records per shard per second.
    #[arg(long, default_value = "20")]
    max_per_sec: u32,

    /// Number of batches to plan.
    #[arg(long, default_value = "20")]
    batches: u64,

    /// Initial per-batch record cap.
    #[arg(long)]
    cap: Option<u64>,

    /// Cap to publish through the dynamic-config document.
    #[arg(long)]
    new_cap: Option<u64>,

    /// Batch before which the new cap is published (defaults to halfway).
    #[arg(long)]
    cap_change_at: Option<u64>,

    /// Starting-position policy (earliest, latest or a JSON shard map).
    #[arg(long, default_value = "earliest")]
    starting_offsets: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let start = now_epoch_secs().saturating_sub(args.seconds);
    let store = SimulatedCoordStore::new(args.seed);
    let source = SimulatedLogSource::with_random_traffic(
        args.seed,
        args.shards,
        start,
        args.seconds,
        args.max_per_sec,
    );
    let sessions = CoordSessions::new(Arc::new(SimulatedConnector::new(store.clone())));
    let clients = SourceClients::new(Arc::new(SimulatedSourceConnector::new(source.clone())));

    let mut raw = HashMap::from([
        (keys::COORD_CONNECT.to_string(), "sim:2181".to_string()),
        (keys::CHECKPOINT_ROOT.to_string(), "/tidemark/checkpoints".to_string()),
        (keys::PROJECT.to_string(), "sim-project".to_string()),
        (keys::LOGSTORE.to_string(), "sim-logstore".to_string()),
        (keys::SOURCE_ENDPOINT.to_string(), "sim://logs".to_string()),
        (keys::ACCESS_KEY_ID.to_string(), "sim".to_string()),
        (keys::ACCESS_KEY_SECRET.to_string(), "sim".to_string()),
        (keys::STARTING_OFFSETS.to_string(), args.starting_offsets.clone()),
        (keys::DYNAMIC_CONFIG_ENABLE.to_string(), "true".to_string()),
    ]);
    if let Some(cap) = args.cap {
        raw.insert(keys::MAX_OFFSETS_PER_TRIGGER.to_string(), cap.to_string());
    }
    let options = SourceOptions::from_map(&raw)?;
    let (project, logstore) = (options.project.clone(), options.logstore.clone());

    info!(
        seed = args.seed,
        shards = args.shards,
        seconds = args.seconds,
        batches = args.batches,
        "Starting simulation"
    );

    let coordinator = ProgressCoordinator::open(options, &sessions, &clients).await?;
    let cap_change_at = args.cap_change_at.unwrap_or(args.batches / 2);
    let mut total_records = 0u64;

    for batch in 1..=args.batches {
        if batch == cap_change_at {
            if let Some(new_cap) = args.new_cap.filter(|&cap| cap > 0) {
                let doc = format!(
                    r#"{{"version":"v1","config":{{"{project}":{{"{logstore}":{{"{}":"{new_cap}"}}}}}}}}"#,
                    keys::MAX_OFFSETS_PER_TRIGGER
                );
                store.poke(DYNAMIC_CONFIG_PATH_DEFAULT, doc);
                // Let the watcher task observe the change.
                while coordinator.live_cap().get() != Some(new_cap) {
                    tokio::task::yield_now().await;
                }
            }
        }

        let batch_id = BatchId::new(batch);
        let plan = coordinator.plan_next_batch(None).await?;
        let mut records = 0u64;
        for (&shard_id, range) in &plan.ranges {
            records += source
                .count_records(shard_id, range.start.bound, range.end.bound)
                .await?;
            coordinator
                .commit_range_end(shard_id, batch_id, &range.end.cursor)
                .await?;
        }
        if batch > 1 {
            coordinator.cleanup_batch(BatchId::new(batch - 1)).await?;
        }
        total_records += records;

        info!(
            batch = %batch_id,
            bound = plan.bound,
            cap = ?coordinator.live_cap().get(),
            records,
            "Committed batch"
        );
    }

    let generated: u64 = (0..args.shards)
        .map(|raw| source.record_count(tidemark_core::ShardId::new(raw)))
        .sum();
    info!(
        total_records,
        generated,
        remaining = generated.saturating_sub(total_records),
        "Simulation finished"
    );
    coordinator.shutdown();
    Ok(())
}
