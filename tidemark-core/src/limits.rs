//! System limits and configuration bounds.
//!
//! Following TigerStyle: put limits on everything.

/// System-wide limits for Tidemark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Longest lease a caller may request on a shard lock, in seconds.
    pub lease_secs_max: u64,
    /// Maximum number of shards a single plan may cover.
    pub shards_per_plan_max: u32,
    /// Maximum bisection steps when rate-limiting a batch bound.
    pub rate_limit_steps_max: u32,
}

impl Limits {
    /// Creates limits with safe defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            // One day: a crashed holder never locks a shard out for longer.
            lease_secs_max: 24 * 60 * 60,
            shards_per_plan_max: 4096,
            // 64 steps covers the full u64 range of bounds.
            rate_limit_steps_max: 64,
        }
    }

    /// Validates that all limits are internally consistent.
    ///
    /// # Errors
    /// Returns an error if any limit is zero.
    pub const fn validate(&self) -> crate::Result<()> {
        if self.lease_secs_max == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "lease_secs_max",
                reason: "must be positive",
            });
        }
        if self.shards_per_plan_max == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "shards_per_plan_max",
                reason: "must be positive",
            });
        }
        if self.rate_limit_steps_max == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "rate_limit_steps_max",
                reason: "must be positive",
            });
        }
        Ok(())
    }

    /// Checks a requested lease duration against `lease_secs_max`.
    ///
    /// # Errors
    /// Returns `LimitExceeded` if the lease is too long, `InvalidArgument` if zero.
    pub const fn check_lease_secs(&self, lease_secs: u64) -> crate::Result<()> {
        if lease_secs == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "lease_secs",
                reason: "must be positive",
            });
        }
        if lease_secs > self.lease_secs_max {
            return Err(crate::Error::LimitExceeded {
                limit: "lease_secs",
                max: self.lease_secs_max,
                actual: lease_secs,
            });
        }
        Ok(())
    }

    /// Checks the number of shards in one plan against `shards_per_plan_max`.
    ///
    /// # Errors
    /// Returns `LimitExceeded` if there are too many shards.
    pub const fn check_shards_per_plan(&self, shards: usize) -> crate::Result<()> {
        if shards as u64 > self.shards_per_plan_max as u64 {
            return Err(crate::Error::LimitExceeded {
                limit: "shards_per_plan",
                max: self.shards_per_plan_max as u64,
                actual: shards as u64,
            });
        }
        Ok(())
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits_are_valid() {
        assert!(Limits::new().validate().is_ok());
    }

    #[test]
    fn test_zero_limit_rejected() {
        let limits = Limits {
            shards_per_plan_max: 0,
            ..Limits::new()
        };
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_lease_secs_bounds() {
        let limits = Limits::new();
        assert!(limits.check_lease_secs(30).is_ok());
        assert!(limits.check_lease_secs(0).is_err());
        assert_eq!(
            limits.check_lease_secs(limits.lease_secs_max + 1),
            Err(crate::Error::LimitExceeded {
                limit: "lease_secs",
                max: limits.lease_secs_max,
                actual: limits.lease_secs_max + 1,
            })
        );
    }

    #[test]
    fn test_shards_per_plan_bound() {
        let limits = Limits {
            shards_per_plan_max: 2,
            ..Limits::new()
        };
        assert!(limits.check_shards_per_plan(2).is_ok());
        assert!(limits.check_shards_per_plan(3).is_err());
    }
}
