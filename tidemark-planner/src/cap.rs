//! Live per-batch record cap.
//!
//! Written by the dynamic-config watcher task and read by the planning loop.
//! The only operation either side needs is whole-value replace or read, so
//! the cap is a single atomic word; zero encodes "uncapped".

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomically swappable per-batch record cap.
#[derive(Debug, Default)]
pub struct LiveCap(AtomicU64);

impl LiveCap {
    /// Creates a cap; `None` means uncapped.
    #[must_use]
    pub fn new(cap: Option<u64>) -> Self {
        Self(AtomicU64::new(encode(cap)))
    }

    /// Returns the current cap.
    #[must_use]
    pub fn get(&self) -> Option<u64> {
        decode(self.0.load(Ordering::Acquire))
    }

    /// Replaces the cap.
    pub fn set(&self, cap: Option<u64>) {
        self.0.store(encode(cap), Ordering::Release);
    }

    /// Replaces the cap, returning the previous value.
    pub fn swap(&self, cap: Option<u64>) -> Option<u64> {
        decode(self.0.swap(encode(cap), Ordering::AcqRel))
    }
}

const fn encode(cap: Option<u64>) -> u64 {
    match cap {
        Some(n) => n,
        None => 0,
    }
}

const fn decode(raw: u64) -> Option<u64> {
    if raw == 0 {
        None
    } else {
        Some(raw)
    }
}
