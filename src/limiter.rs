use std::{sync::Mutex, time::Duration};

use tokio::time::Instant;

/// Result of taking units from a [`Limiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consumption {
    /// Units left after this call. Zero or less means the acceptor must stop admitting connections.
    pub remaining: i64,
    /// How long to stay suspended when `remaining` is not positive.
    pub pause: Duration,
}

impl Consumption {
    /// Whether the quota is used up.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining <= 0
    }
}

/// Admission-rate bucket consulted by acceptors after each successful hand-off.
///
/// One limiter is typically shared by all acceptors of a listener, so `consume` must be atomic.
pub trait Limiter: Send + Sync {
    /// Take `units` from the bucket.
    fn consume(&self, units: u32) -> Consumption;
}

/// Fixed-window token bucket: holds `capacity` tokens, refilled to full every `interval`.
///
/// `consume` never blocks. When the bucket runs dry the returned pause is the time left until the next refill.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    interval: Duration,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: i64,
    refilled_at: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    #[must_use]
    pub fn new(capacity: u32, interval: Duration) -> Self {
        TokenBucket {
            capacity,
            interval,
            state: Mutex::new(BucketState {
                tokens: i64::from(capacity),
                refilled_at: Instant::now(),
            }),
        }
    }

    /// Maximum number of tokens per interval.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

impl Limiter for TokenBucket {
    fn consume(&self, units: u32) -> Consumption {
        let now = Instant::now();
        let mut st = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if !self.interval.is_zero() {
            let elapsed = now.saturating_duration_since(st.refilled_at);
            if elapsed >= self.interval {
                let periods = elapsed.as_nanos() / self.interval.as_nanos();
                let periods = u32::try_from(periods).unwrap_or(u32::MAX);
                st.refilled_at = st
                    .refilled_at
                    .checked_add(self.interval.saturating_mul(periods))
                    .unwrap_or(now);
                st.tokens = i64::from(self.capacity);
            }
        }

        st.tokens = st.tokens.saturating_sub(i64::from(units)).max(0);
        // an interval past the end of the clock never refills
        let pause = st
            .refilled_at
            .checked_add(self.interval)
            .map_or(Duration::MAX, |t| t.saturating_duration_since(now));
        Consumption {
            remaining: st.tokens,
            pause,
        }
    }
}

/// Limiter that never runs out.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

impl Limiter for Unlimited {
    fn consume(&self, _units: u32) -> Consumption {
        Consumption {
            remaining: i64::MAX,
            pause: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn drains_then_refills() {
        let b = TokenBucket::new(3, Duration::from_secs(1));
        assert_eq!(b.consume(1).remaining, 2);
        assert_eq!(b.consume(1).remaining, 1);

        tokio::time::advance(Duration::from_millis(400)).await;
        let c = b.consume(1);
        assert!(c.is_exhausted());
        assert_eq!(c.pause, Duration::from_millis(600));

        tokio::time::advance(Duration::from_millis(600)).await;
        let c = b.consume(1);
        assert_eq!(c.remaining, 2);
        assert!(!c.is_exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn skips_missed_intervals() {
        let b = TokenBucket::new(1, Duration::from_secs(1));
        assert!(b.consume(1).is_exhausted());
        tokio::time::advance(Duration::from_millis(3500)).await;
        let c = b.consume(1);
        assert!(c.is_exhausted());
        assert_eq!(c.pause, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn huge_interval_never_refills() {
        let b = TokenBucket::new(2, Duration::MAX);
        assert_eq!(b.capacity(), 2);
        let c = b.consume(1);
        assert_eq!(c.remaining, 1);
        tokio::time::advance(Duration::from_secs(86_400)).await;
        let c = b.consume(1);
        assert!(c.is_exhausted());
        assert_eq!(c.pause, Duration::MAX);
    }

    #[test]
    fn unlimited_never_runs_out() {
        assert!(!Unlimited.consume(u32::MAX).is_exhausted());
    }
}
