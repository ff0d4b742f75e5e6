use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

/// Per-key token bucket. Each key starts with a full burst and refills at
/// `rate` tokens per second.
#[derive(Clone)]
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
}

impl RateLimiter {
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        Self {
            rate: rate_per_sec,
            burst: burst as f64,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Take one token if available
    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let bucket = self.refilled(&mut buckets, key, now);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Take `cost` tokens, sleeping until they have been earned. The debt is
    /// booked under the lock so concurrent callers queue up behind each other.
    pub async fn wait(&self, key: &str, cost: u32) {
        let delay = {
            let now = Instant::now();
            let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
            let rate = self.rate;
            let bucket = self.refilled(&mut buckets, key, now);
            bucket.tokens -= cost as f64;
            if bucket.tokens >= 0.0 || rate <= 0.0 {
                Duration::ZERO
            } else {
                Duration::from_secs_f64(-bucket.tokens / rate)
            }
        };
        if !delay.is_zero() {
            tracing::debug!("Throttling {} for {:?}", key, delay);
            tokio::time::sleep(delay).await;
        }
    }

    /// Forget keys that have not been seen for `max_idle`
    pub fn sweep(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let before = buckets.len();
        buckets.retain(|_, b| now.duration_since(b.last_seen) < max_idle);
        before - buckets.len()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn refilled<'a>(
        &self,
        buckets: &'a mut HashMap<String, Bucket>,
        key: &str,
        now: Instant,
    ) -> &'a mut Bucket {
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.burst,
            last_refill: now,
            last_seen: now,
        });
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.last_refill = now;
        bucket.last_seen = now;
        bucket
    }
}

/// Throttles shared by the request handlers
#[derive(Clone)]
pub struct RateLimiters {
    /// Password attempts on protected downloads, keyed by client address
    pub login: RateLimiter,
    /// Lookups of ids that turned out not to exist
    pub invalid_id: RateLimiter,
    /// Chunk session reservations
    pub new_session: RateLimiter,
}

/// Cost of one password attempt against the login bucket
pub const LOGIN_ATTEMPT_COST: u32 = 3;

impl RateLimiters {
    pub fn new() -> Self {
        Self {
            login: RateLimiter::new(1.0, 6),
            invalid_id: RateLimiter::new(1.0, 10),
            new_session: RateLimiter::new(1.0, 4),
        }
    }

    pub fn sweep(&self, max_idle: Duration) {
        let removed = self.login.sweep(max_idle)
            + self.invalid_id.sweep(max_idle)
            + self.new_session.sweep(max_idle);
        if removed > 0 {
            tracing::debug!("Evicted {} idle rate limit entries", removed);
        }
    }

    /// Evict idle keys every 30 minutes, dropping keys unseen for 12 hours
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let limiters = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30 * 60));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                limiters.sweep(Duration::from_secs(12 * 3600));
            }
        })
    }
}

impl Default for RateLimiters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_reject() {
        let limiter = RateLimiter::new(0.0, 3);
        assert!(limiter.allow("a"));
        assert!(limiter.allow("a"));
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
        // Keys are independent
        assert!(limiter.allow("b"));
    }

    #[test]
    fn test_refill() {
        let limiter = RateLimiter::new(1000.0, 1);
        assert!(limiter.allow("a"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.allow("a"));
    }

    #[test]
    fn test_sweep_removes_idle_keys() {
        let limiter = RateLimiter::new(1.0, 1);
        limiter.allow("a");
        limiter.allow("b");
        assert_eq!(limiter.sweep(Duration::from_secs(3600)), 0);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(limiter.sweep(Duration::from_millis(1)), 2);
        assert_eq!(limiter.len(), 0);
    }

    #[tokio::test]
    async fn test_wait_sleeps_for_debt() {
        let limiter = RateLimiter::new(100.0, 6);
        limiter.wait("ip", LOGIN_ATTEMPT_COST).await;
        limiter.wait("ip", LOGIN_ATTEMPT_COST).await;

        // Burst used up, the third attempt has to earn three tokens
        let start = Instant::now();
        limiter.wait("ip", LOGIN_ATTEMPT_COST).await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
