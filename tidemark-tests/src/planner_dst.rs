//! Batch planner DST tests.
//!
//! A planner drains a randomly generated log under a changing cap while the
//! log source fails some queries. Every successful plan is checked against
//! the plan-chain invariants, and once caught up every generated record must
//! have been planned exactly once.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tidemark_core::ShardId;
use tidemark_planner::{BatchOffsetPlanner, LiveCap, ShardRangePlan, StartingPosition};
use tidemark_source::{LogSource, LogSourceFaultConfig, ShardOffsetReader, SimulatedLogSource};

use crate::properties::PlanChainChecker;
use crate::scenarios::seeds::{CI_SEED_COUNT, REGRESSION_SEEDS};
use crate::scenarios::sources::{SmallLog, WideLog, T0};

/// Upper bound on plans per drain; a stalled planner fails instead of spinning.
const PLANS_MAX: u64 = 10_000;

struct DrainStats {
    plans: u64,
    failures: u64,
}

fn small_log(seed: u64) -> SimulatedLogSource {
    SimulatedLogSource::with_random_traffic(
        seed,
        SmallLog::SHARDS,
        T0,
        SmallLog::SECONDS,
        SmallLog::MAX_PER_SEC,
    )
}

fn earliest_planner(source: &SimulatedLogSource, cap: &Arc<LiveCap>) -> BatchOffsetPlanner {
    BatchOffsetPlanner::new(
        ShardOffsetReader::new(Arc::new(source.clone())),
        StartingPosition::Earliest,
        Arc::clone(cap),
    )
}

async fn records_in(source: &SimulatedLogSource, plan: &ShardRangePlan) -> u64 {
    let mut total = 0;
    for (&shard_id, range) in &plan.ranges {
        total += source
            .count_records(shard_id, range.start.bound, range.end.bound)
            .await
            .unwrap();
    }
    total
}

fn generated(source: &SimulatedLogSource, shards: u64) -> u64 {
    (0..shards)
        .map(|raw| source.record_count(ShardId::new(raw)))
        .sum()
}

async fn latest_bound(source: &SimulatedLogSource) -> u64 {
    let shard_ids = source.list_shards().await.unwrap();
    let latest = source.fetch_latest(&shard_ids).await.unwrap();
    latest.values().map(|p| p.bound).max().unwrap()
}

/// Drains the whole log from earliest. Panics on any invariant violation.
async fn drain(seed: u64, source: &SimulatedLogSource, shards: u64, fault_rate: f64) -> DrainStats {
    let mut rng = StdRng::seed_from_u64(seed);
    let cap = Arc::new(LiveCap::new(Some(rng.gen_range(1..500))));
    let mut planner = earliest_planner(source, &cap);
    let target = latest_bound(source).await;

    let mut checker = PlanChainChecker::new();
    let mut stats = DrainStats {
        plans: 0,
        failures: 0,
    };
    let mut planned = 0;

    for _ in 0..PLANS_MAX {
        // An operator occasionally publishes a new cap.
        if rng.gen_bool(0.1) {
            let next = if rng.gen_bool(0.2) {
                None
            } else {
                Some(rng.gen_range(1..2_000))
            };
            cap.set(next);
        }

        let before = planner.last_plan().cloned();
        *source.fault_config() = LogSourceFaultConfig::none().with_fetch_fail_rate(fault_rate);
        let result = planner.plan_next_batch(None).await;
        *source.fault_config() = LogSourceFaultConfig::none();

        let plan = match result {
            Ok(plan) => plan,
            Err(e) => {
                assert!(e.is_unavailable(), "seed {seed}: {e:?}");
                // A failed plan leaves no trace.
                assert_eq!(planner.last_plan().cloned(), before, "seed {seed}");
                stats.failures += 1;
                continue;
            }
        };

        let records = records_in(source, &plan).await;
        checker.observe(&plan, records, cap.get());
        assert!(
            checker.is_clean(),
            "seed {seed}, plan {}: {:?}",
            stats.plans,
            checker.violations()
        );
        stats.plans += 1;
        planned += records;

        if plan.bound >= target {
            break;
        }
    }

    assert!(
        planner.last_plan().is_some_and(|p| p.bound >= target),
        "seed {seed}: planner never caught up"
    );
    assert_eq!(
        planned,
        generated(source, shards),
        "seed {seed}: records lost or planned twice"
    );
    stats
}

#[tokio::test]
async fn test_dst_planner_drains_small_log() {
    for &seed in REGRESSION_SEEDS {
        let source = small_log(seed);
        let stats = drain(seed, &source, SmallLog::SHARDS, 0.0).await;
        assert_eq!(stats.failures, 0);
        assert!(stats.plans > 0);
    }
}

#[tokio::test]
async fn test_dst_planner_survives_source_faults() {
    let mut failures = 0;
    for seed in 0..CI_SEED_COUNT / 4 {
        let source = small_log(seed);
        failures += drain(seed, &source, SmallLog::SHARDS, 0.05).await.failures;
    }
    assert!(failures > 0, "faults should be injected");
}

#[tokio::test]
async fn test_dst_planner_idle_shard_does_not_stall() {
    // One shard stops early; the others keep lagging under a tiny cap.
    let source = SimulatedLogSource::new(7);
    for raw in 0..3 {
        source.add_shard(ShardId::new(raw), T0);
    }
    for second in T0 + 1..=T0 + 40 {
        if second <= T0 + 5 {
            source.append(ShardId::new(0), second, 1);
        }
        source.append(ShardId::new(1), second, 20);
        source.append(ShardId::new(2), second, 20);
    }

    for seed in REGRESSION_SEEDS {
        let stats = drain(*seed, &source, 3, 0.0).await;
        assert!(stats.plans > 0);
    }
}

#[tokio::test]
async fn test_dst_planner_wide_log_with_discovery() {
    for &seed in REGRESSION_SEEDS {
        // Half the shards exist from the start; the rest appear mid-stream.
        let source = SimulatedLogSource::new(seed);
        let mut rng = StdRng::seed_from_u64(seed);
        let half = WideLog::SHARDS / 2;
        let appear_at = T0 + WideLog::SECONDS / 2;
        for raw in 0..half {
            source.add_shard(ShardId::new(raw), T0);
        }

        let cap = Arc::new(LiveCap::new(Some(200)));
        let mut planner = earliest_planner(&source, &cap);
        let mut checker = PlanChainChecker::new();
        let mut planned = 0;

        for second in T0 + 1..=T0 + WideLog::SECONDS {
            if second == appear_at {
                for raw in half..WideLog::SHARDS {
                    source.add_shard(ShardId::new(raw), second - 1);
                }
            }
            let live = if second < appear_at {
                half
            } else {
                WideLog::SHARDS
            };
            for raw in 0..live {
                let count = rng.gen_range(0..=WideLog::MAX_PER_SEC);
                source.append(ShardId::new(raw), second, count);
            }

            let plan = planner.plan_next_batch(None).await.unwrap();
            assert_eq!(plan.ranges.len() as u64, live, "seed {seed}");
            let records = records_in(&source, &plan).await;
            checker.observe(&plan, records, cap.get());
            planned += records;
        }

        // Uncapped catch-up.
        cap.set(None);
        let plan = planner.plan_next_batch(None).await.unwrap();
        let records = records_in(&source, &plan).await;
        checker.observe(&plan, records, cap.get());
        planned += records;

        assert!(checker.is_clean(), "seed {seed}: {:?}", checker.violations());
        assert_eq!(planned, generated(&source, WideLog::SHARDS), "seed {seed}");
    }
}

#[tokio::test]
async fn test_dst_planner_deterministic_replay() {
    async fn run(seed: u64) -> (u64, u64) {
        let source = small_log(seed);
        let stats = drain(seed, &source, SmallLog::SHARDS, 0.05).await;
        (stats.plans, stats.failures)
    }
    assert_eq!(run(0x1337).await, run(0x1337).await);
}
