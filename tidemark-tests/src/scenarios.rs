//! Reusable test scenarios for Tidemark simulation.

/// Seeds for reproducible testing.
pub mod seeds {
    /// Standard test seeds that have historically found bugs.
    pub const REGRESSION_SEEDS: &[u64] = &[
        42,
        12345,
        0xDEAD_BEEF,
        999,
        7777,
        0x1337,
        0xCAFE_BABE,
        1,
        u64::MAX,
        0,
    ];

    /// Number of random seeds to test in CI.
    pub const CI_SEED_COUNT: u64 = 100;
}

/// Standard log-source shapes.
pub mod sources {
    /// Epoch second at which simulated traffic starts.
    pub const T0: u64 = 1_700_000_000;

    /// A handful of shards with modest traffic.
    pub struct SmallLog;

    impl SmallLog {
        /// Number of shards.
        pub const SHARDS: u64 = 3;
        /// Seconds of traffic.
        pub const SECONDS: u64 = 120;
        /// Maximum records per shard per second.
        pub const MAX_PER_SEC: u32 = 15;
    }

    /// Many shards with bursty traffic.
    pub struct WideLog;

    impl WideLog {
        /// Number of shards.
        pub const SHARDS: u64 = 32;
        /// Seconds of traffic.
        pub const SECONDS: u64 = 60;
        /// Maximum records per shard per second.
        pub const MAX_PER_SEC: u32 = 50;
    }
}

/// Checkpoint identities used across suites.
pub mod checkpoints {
    /// Checkpoint root.
    pub const ROOT: &str = "/tidemark";
    /// Project name.
    pub const PROJECT: &str = "orders";
    /// Logstore name.
    pub const LOGSTORE: &str = "events";
    /// Project/logstore-scoped root under [`ROOT`].
    pub const SCOPE: &str = "/tidemark/commit/orders/events";
}
