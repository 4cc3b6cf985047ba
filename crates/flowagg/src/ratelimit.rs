//! Rate-limited logging utility: "log at most R messages per T interval per
//! call site" (§9), implemented as a token bucket. Each call site owns its
//! own `RateLimiter` so a storm of malformed flows from one stage cannot
//! starve warnings from another.

use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    capacity: f64,
    refill_per_interval: f64,
    interval: Duration,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(max_per_interval: u32, interval: Duration) -> Self {
        let capacity = max_per_interval as f64;
        RateLimiter {
            capacity,
            refill_per_interval: capacity,
            interval,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Returns `true` if the caller should log this occurrence, consuming a
    /// token. Always returns `true` for the underlying event having
    /// happened; callers use this only to decide whether to emit the log
    /// line, never to decide whether to drop/count the record itself.
    pub fn allow(&self) -> bool {
        let mut bucket = self.bucket.lock().unwrap();
        let elapsed = bucket.last_refill.elapsed();
        if elapsed >= self.interval {
            let intervals = elapsed.as_secs_f64() / self.interval.as_secs_f64();
            bucket.tokens = (bucket.tokens + intervals * self.refill_per_interval).min(self.capacity);
            bucket.last_refill = Instant::now();
        }
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_capacity_then_suppresses() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[test]
    fn refills_after_interval_elapses() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));
        assert!(limiter.allow());
        assert!(!limiter.allow());
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.allow());
    }
}
