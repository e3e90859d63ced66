//! Per-source rate limiting
//!
//! Fixed-window counters keyed by source IP. The gateway runs two
//! independent instances: a global limiter over every control request and a
//! stricter one over the authentication endpoints that additionally blocks
//! the source for a cool-down once the window is exhausted.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitVerdict {
    Admitted,
    Limited { retry_after_secs: u64 },
}

#[derive(Debug)]
struct Bucket {
    window_start: Instant,
    count: u32,
    blocked_until: Option<Instant>,
}

/// Fixed-window rate limiter.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    /// Extra cool-down applied once a window is exhausted (auth endpoints)
    block: Option<Duration>,
    buckets: DashMap<IpAddr, Bucket>,
}

impl RateLimiter {
    /// Limiter that rejects for the remainder of the window only.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            block: None,
            buckets: DashMap::new(),
        }
    }

    /// Limiter that blocks the source for `block` once the window budget is
    /// spent.
    pub fn with_block(max_requests: u32, window: Duration, block: Duration) -> Self {
        Self {
            max_requests,
            window,
            block: Some(block),
            buckets: DashMap::new(),
        }
    }

    /// Count one request from `addr` and decide whether to admit it.
    pub fn check(&self, addr: IpAddr) -> RateLimitVerdict {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(addr).or_insert_with(|| Bucket {
            window_start: now,
            count: 0,
            blocked_until: None,
        });

        if let Some(until) = bucket.blocked_until {
            if now < until {
                return RateLimitVerdict::Limited {
                    retry_after_secs: retry_after(until, now),
                };
            }
            // Cool-down over, start fresh
            bucket.blocked_until = None;
            bucket.window_start = now;
            bucket.count = 0;
        }

        if now.duration_since(bucket.window_start) >= self.window {
            bucket.window_start = now;
            bucket.count = 0;
        }

        if bucket.count >= self.max_requests {
            let until = match self.block {
                Some(block) => {
                    let until = now + block;
                    bucket.blocked_until = Some(until);
                    warn!("Source {} exhausted auth attempts, blocked for {}s", addr, block.as_secs());
                    until
                }
                None => bucket.window_start + self.window,
            };
            return RateLimitVerdict::Limited {
                retry_after_secs: retry_after(until, now),
            };
        }

        bucket.count += 1;
        RateLimitVerdict::Admitted
    }

    /// Drop buckets that have been quiet for a full window (plus cool-down).
    /// Called periodically so the map does not grow with one entry per
    /// source ever seen.
    pub fn prune(&self) {
        let now = Instant::now();
        let horizon = self.window + self.block.unwrap_or(Duration::ZERO);
        let before = self.buckets.len();

        self.buckets.retain(|_, bucket| {
            let blocked = bucket.blocked_until.is_some_and(|until| now < until);
            blocked || now.duration_since(bucket.window_start) < horizon
        });

        let removed = before - self.buckets.len();
        if removed > 0 {
            debug!("Rate limiter pruned {} idle buckets", removed);
        }
    }
}

fn retry_after(until: Instant, now: Instant) -> u64 {
    // Round up so the hint is never 0 while still limited
    until.duration_since(now).as_secs().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, n])
    }

    #[test]
    fn test_admits_up_to_budget_then_limits() {
        let limiter = RateLimiter::new(5, Duration::from_secs(900));

        for _ in 0..5 {
            assert_eq!(limiter.check(addr(1)), RateLimitVerdict::Admitted);
        }
        match limiter.check(addr(1)) {
            RateLimitVerdict::Limited { retry_after_secs } => {
                assert!(retry_after_secs > 0 && retry_after_secs <= 900);
            }
            RateLimitVerdict::Admitted => panic!("request over budget was admitted"),
        }
    }

    #[test]
    fn test_sources_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(900));

        assert_eq!(limiter.check(addr(1)), RateLimitVerdict::Admitted);
        assert!(matches!(
            limiter.check(addr(1)),
            RateLimitVerdict::Limited { .. }
        ));
        // A different source still has its own budget
        assert_eq!(limiter.check(addr(2)), RateLimitVerdict::Admitted);
    }

    #[test]
    fn test_window_reset() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));

        assert_eq!(limiter.check(addr(1)), RateLimitVerdict::Admitted);
        assert!(matches!(
            limiter.check(addr(1)),
            RateLimitVerdict::Limited { .. }
        ));

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(limiter.check(addr(1)), RateLimitVerdict::Admitted);
    }

    #[test]
    fn test_block_outlasts_window() {
        let limiter =
            RateLimiter::with_block(1, Duration::from_millis(10), Duration::from_millis(50));

        assert_eq!(limiter.check(addr(1)), RateLimitVerdict::Admitted);
        assert!(matches!(
            limiter.check(addr(1)),
            RateLimitVerdict::Limited { .. }
        ));

        // Window has passed but the block has not
        std::thread::sleep(Duration::from_millis(20));
        assert!(matches!(
            limiter.check(addr(1)),
            RateLimitVerdict::Limited { .. }
        ));

        // Block elapsed: fresh budget
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(limiter.check(addr(1)), RateLimitVerdict::Admitted);
    }

    #[test]
    fn test_prune_drops_idle_buckets() {
        let limiter = RateLimiter::new(5, Duration::from_millis(10));

        limiter.check(addr(1));
        limiter.check(addr(2));
        assert_eq!(limiter.buckets.len(), 2);

        std::thread::sleep(Duration::from_millis(20));
        limiter.prune();
        assert_eq!(limiter.buckets.len(), 0);
    }
}
