//! Strongly-typed identifiers and position types for Tidemark.
//!
//! Following `TigerStyle`: explicit types prevent bugs from mixing up IDs.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Macro to generate strongly-typed ID wrappers.
///
/// Each ID type wraps a u64 and provides:
/// - Type safety (can't mix `ShardId` with `BatchId`)
/// - Debug/Display formatting
/// - Zero-cost abstraction (same as raw u64)
macro_rules! define_id {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new ID from a raw u64 value.
            #[inline]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw u64 value.
            #[inline]
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }

            /// Returns the next ID in sequence.
            ///
            /// # Panics
            /// Panics if the ID would overflow.
            #[inline]
            #[must_use]
            pub const fn next(self) -> Self {
                assert!(self.0 < u64::MAX, "ID overflow");
                Self(self.0 + 1)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.get()
            }
        }
    };
}

// Stable for the lifetime of a source; new values appear, old ones are never reused.
define_id!(ShardId, "shard", "Identifier of one partition of the log source.");
// Assigned by the execution engine, strictly increasing.
define_id!(BatchId, "batch", "Identifier of one execution batch.");

// -----------------------------------------------------------------------------
// Progress Token
// -----------------------------------------------------------------------------

/// Opaque cursor into a shard, meaningful only to the log source.
///
/// The coordination layer stores and compares these as bytes. Ordering between
/// two tokens of the same shard is defined by the source, never here, so this
/// type deliberately does not implement `Ord`.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct ProgressToken(String);

impl ProgressToken {
    /// Creates a token from its string form.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the token bytes as persisted in the coordination store.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Returns true if this is the empty token.
    ///
    /// An empty token is a legal value and distinct from "no token".
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the token, returning the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for ProgressToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token({:?})", self.0)
    }
}

impl fmt::Display for ProgressToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProgressToken {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProgressToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// -----------------------------------------------------------------------------
// Shard Position
// -----------------------------------------------------------------------------

/// A cursor paired with its temporal bound (epoch seconds).
///
/// The log source answers position queries with both: the bound is what the
/// planner compares and rate-limits on, the cursor is what gets persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardPosition {
    /// Temporal bound of the cursor in seconds since the Unix epoch.
    pub bound: u64,
    /// Opaque cursor.
    pub cursor: ProgressToken,
}

impl ShardPosition {
    /// Creates a new position.
    #[must_use]
    pub fn new(bound: u64, cursor: impl Into<ProgressToken>) -> Self {
        Self {
            bound,
            cursor: cursor.into(),
        }
    }
}

/// Returns the current wall-clock time in seconds since the Unix epoch.
///
/// A clock set before the epoch reads as zero.
#[must_use]
pub fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_type_safety() {
        let shard = ShardId::new(1);
        let batch = BatchId::new(1);

        // Same raw value, different types.
        assert_eq!(shard.get(), batch.get());
    }

    #[test]
    fn test_id_display() {
        let shard = ShardId::new(42);
        assert_eq!(format!("{shard}"), "shard-42");
        assert_eq!(format!("{shard:?}"), "shard(42)");
    }

    #[test]
    fn test_id_next() {
        let id = BatchId::new(0);
        assert_eq!(id.next().get(), 1);
        assert_eq!(id.next().next().get(), 2);
    }

    #[test]
    #[should_panic(expected = "ID overflow")]
    fn test_id_overflow_panics() {
        let _ = BatchId::new(u64::MAX).next();
    }

    #[test]
    fn test_empty_token_is_a_value() {
        let token = ProgressToken::new("");
        assert!(token.is_empty());
        assert_eq!(token.as_bytes(), b"");
        assert_ne!(Some(token), None);
    }

    #[test]
    fn test_position_from_str() {
        let pos = ShardPosition::new(1_700_000_000, "MTU0NDQ=");
        assert_eq!(pos.cursor.as_str(), "MTU0NDQ=");
        assert_eq!(pos.bound, 1_700_000_000);
    }

    #[test]
    fn test_now_is_after_2020() {
        assert!(now_epoch_secs() > 1_577_836_800);
    }
}
