//! Offset bookkeeping DST tests.
//!
//! Speculative committers race to close the same ranges while the store
//! injects faults. Failed calls must leave no trace, and the first successful
//! range close must be the one everyone reads back.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tidemark_coord::{CoordPaths, CoordStoreFaultConfig, OffsetStore, SimulatedCoordStore};
use tidemark_core::{BatchId, ProgressToken, ShardId};

use crate::scenarios::checkpoints::{LOGSTORE, PROJECT, ROOT};
use crate::scenarios::seeds::{CI_SEED_COUNT, REGRESSION_SEEDS};

fn offsets(store: &SimulatedCoordStore) -> OffsetStore {
    OffsetStore::new(
        Arc::new(store.new_session()),
        CoordPaths::new(ROOT, PROJECT, LOGSTORE).unwrap(),
    )
}

/// Runs one seed; returns the number of injected failures observed.
async fn run_commit_race(seed: u64, fault_config: CoordStoreFaultConfig) -> u64 {
    let store = SimulatedCoordStore::with_faults(seed, fault_config);
    let committers: Vec<OffsetStore> = (0..3).map(|_| offsets(&store)).collect();
    let mut rng = StdRng::seed_from_u64(seed);

    // Bootstrap without faults; it is fatal in production anyway.
    let saved = std::mem::replace(&mut *store.fault_config(), CoordStoreFaultConfig::none());
    committers[0].ensure_layout().await.unwrap();
    *store.fault_config() = saved;

    let mut winners: HashMap<(ShardId, BatchId), ProgressToken> = HashMap::new();
    let mut last_saved: HashMap<ShardId, ProgressToken> = HashMap::new();
    let mut failures = 0u64;

    for batch in 1..=20u64 {
        let batch_id = BatchId::new(batch);
        for raw_shard in 0..4u64 {
            let shard_id = ShardId::new(raw_shard);
            for _ in 0..rng.gen_range(1..=3) {
                let who = rng.gen_range(0..committers.len());
                let token = ProgressToken::new(format!("s{raw_shard}-b{batch}-c{who}"));
                match committers[who]
                    .try_mark_range_end(shard_id, batch_id, &token)
                    .await
                {
                    Ok(true) => {
                        assert!(
                            winners.insert((shard_id, batch_id), token.clone()).is_none(),
                            "seed {seed}: two winners for {shard_id}/{batch_id}"
                        );
                        match committers[who].save_offset(shard_id, &token).await {
                            Ok(()) => {
                                last_saved.insert(shard_id, token);
                            }
                            Err(e) => {
                                assert!(e.is_unavailable());
                                failures += 1;
                            }
                        }
                    }
                    Ok(false) => {
                        assert!(
                            winners.contains_key(&(shard_id, batch_id)),
                            "seed {seed}: lost a race nobody won"
                        );
                    }
                    Err(e) => {
                        assert!(e.is_unavailable(), "seed {seed}: {e:?}");
                        failures += 1;
                    }
                }
            }
        }
    }

    // Verify with a fault-free view of the same namespace.
    *store.fault_config() = CoordStoreFaultConfig::none();
    let reader = offsets(&store);
    for ((shard_id, batch_id), token) in &winners {
        assert_eq!(
            &reader.read_range_end(*shard_id, *batch_id).await.unwrap(),
            token,
            "seed {seed}: range end changed after close"
        );
    }
    for raw_shard in 0..4u64 {
        let shard_id = ShardId::new(raw_shard);
        assert_eq!(
            reader.read_offset(shard_id).await.unwrap(),
            last_saved.get(&shard_id).cloned(),
            "seed {seed}: committed offset diverged"
        );
        let closed = reader.closed_batches(shard_id).await.unwrap();
        let expected = winners.keys().filter(|(s, _)| *s == shard_id).count();
        assert_eq!(closed.len(), expected, "seed {seed}: stray range records");
    }
    failures
}

#[tokio::test]
async fn test_dst_offsets_commit_race_without_faults() {
    for &seed in REGRESSION_SEEDS {
        let failures = run_commit_race(seed, CoordStoreFaultConfig::none()).await;
        assert_eq!(failures, 0);
    }
}

#[tokio::test]
async fn test_dst_offsets_commit_race_with_faults() {
    let mut total_failures = 0;
    for seed in 0..CI_SEED_COUNT {
        total_failures += run_commit_race(seed * 7919, CoordStoreFaultConfig::flaky()).await;
    }
    assert!(total_failures > 0, "faults should be injected");
}

#[tokio::test]
async fn test_dst_offsets_round_trip_any_token() {
    for &seed in REGRESSION_SEEDS {
        let store = SimulatedCoordStore::new(seed);
        let offsets = offsets(&store);
        let mut rng = StdRng::seed_from_u64(seed);

        for _ in 0..50 {
            let len = rng.gen_range(0..24);
            let token: String = (0..len)
                .map(|_| char::from(rng.gen_range(b' '..=b'~')))
                .collect();
            let token = ProgressToken::new(token);
            let shard = ShardId::new(rng.gen_range(0..8));
            offsets.save_offset(shard, &token).await.unwrap();
            assert_eq!(offsets.read_offset(shard).await.unwrap(), Some(token));
        }
    }
}

#[tokio::test]
async fn test_dst_offsets_reset_discards_interim_writes() {
    for &seed in REGRESSION_SEEDS {
        let store = SimulatedCoordStore::new(seed);
        let offsets = offsets(&store);
        let mut rng = StdRng::seed_from_u64(seed);

        offsets.ensure_layout().await.unwrap();
        for _ in 0..rng.gen_range(1..20) {
            let shard = ShardId::new(rng.gen_range(0..8));
            let batch = BatchId::new(rng.gen_range(1..5));
            offsets.save_offset(shard, &"t".into()).await.unwrap();
            offsets.try_mark_range_end(shard, batch, &"t".into()).await.unwrap();
        }
        offsets.ensure_layout().await.unwrap();

        assert!(offsets.read_all_offsets().await.unwrap().is_empty());
        assert!(offsets.range_shards().await.unwrap().is_empty());
        assert!(offsets.is_initialized().await.unwrap());
    }
}

#[tokio::test]
async fn test_dst_offsets_deterministic_replay() {
    let a = run_commit_race(0xDEAD_BEEF, CoordStoreFaultConfig::flaky()).await;
    let b = run_commit_race(0xDEAD_BEEF, CoordStoreFaultConfig::flaky()).await;
    assert_eq!(a, b);
}
