use std::num::NonZeroU32;

use dashmap::DashMap;
use governor::{Quota, RateLimiter as GovRateLimiter};
use nonzero_ext::nonzero;
use relay_core::config::LimitsConfig;
use tracing::debug;

use crate::error::{PipelineError, Result};

type DirectRateLimiter = governor::DefaultDirectRateLimiter;

/// Token bucket per (user, conversation): capacity = burst, refill =
/// tokens/second. One direct limiter per key, lazily created, so
/// concurrent submitters in different conversations never contend.
pub struct SubmitLimiter {
    limiters: DashMap<(i64, i64), DirectRateLimiter>,
    refill_per_sec: NonZeroU32,
    burst: NonZeroU32,
}

impl SubmitLimiter {
    pub fn new(limits: &LimitsConfig) -> Self {
        Self {
            limiters: DashMap::new(),
            refill_per_sec: NonZeroU32::new(limits.message_refill_per_sec)
                .unwrap_or(nonzero!(1u32)),
            burst: NonZeroU32::new(limits.message_rate_capacity).unwrap_or(nonzero!(10u32)),
        }
    }

    /// One token for one submit. Failure carries a retry-after hint derived
    /// from the refill rate.
    pub fn check(&self, user_id: i64, conversation_id: i64) -> Result<()> {
        let limiter = self
            .limiters
            .entry((user_id, conversation_id))
            .or_insert_with(|| {
                GovRateLimiter::direct(
                    Quota::per_second(self.refill_per_sec).allow_burst(self.burst),
                )
            });

        if limiter.check().is_ok() {
            Ok(())
        } else {
            debug!(user_id, conversation_id, "message rate limit exceeded");
            Err(PipelineError::RateLimited {
                retry_after_secs: (1 / u64::from(self.refill_per_sec.get())).max(1),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(capacity: u32, refill: u32) -> LimitsConfig {
        LimitsConfig {
            message_rate_capacity: capacity,
            message_refill_per_sec: refill,
            ..Default::default()
        }
    }

    #[test]
    fn burst_then_limited() {
        let limiter = SubmitLimiter::new(&limits(3, 1));
        for _ in 0..3 {
            limiter.check(1, 100).unwrap();
        }
        assert!(matches!(
            limiter.check(1, 100),
            Err(PipelineError::RateLimited { .. })
        ));
    }

    #[test]
    fn buckets_are_per_user_and_conversation() {
        let limiter = SubmitLimiter::new(&limits(1, 1));
        limiter.check(1, 100).unwrap();
        // different conversation, different bucket
        limiter.check(1, 101).unwrap();
        // different user, different bucket
        limiter.check(2, 100).unwrap();
        assert!(limiter.check(1, 100).is_err());
    }
}
