use std::{
    collections::{hash_map::Entry, HashMap},
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use log::debug;

use crate::{config::LimiterConfig, error::InsufficientTokens};

use self::{
    clock::{Clock, SystemClock},
    token_bucket::{Admitted, TokenBucket},
};

pub mod clock;
pub mod token_bucket;

/// Whatever a caller is limited by, e.g. a client IP or an API key.
pub type Key = String;

/// One [`TokenBucket`] per key, created the first time the key is seen.
///
/// Buckets are never evicted: memory grows with the number of distinct keys.
#[derive(Debug)]
pub struct KeyedRateLimiter<C = SystemClock> {
    config: LimiterConfig,
    clock: C,
    buckets: RwLock<HashMap<Key, TokenBucket>>,
}

impl Default for KeyedRateLimiter {
    fn default() -> Self {
        Self::new(LimiterConfig::default())
    }
}

impl KeyedRateLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> KeyedRateLimiter<C> {
    pub fn with_clock(config: LimiterConfig, clock: C) -> Self {
        Self {
            config,
            clock,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> LimiterConfig {
        self.config
    }

    /// Registers a full bucket for `key` unless it already has one.
    pub fn ensure_bucket(&self, key: &str) {
        self.with_bucket(key, |_| ());
    }

    /// Spends one admission from `key`'s bucket, creating the bucket if needed.
    pub fn try_acquire(&self, key: &str) -> Result<Admitted, InsufficientTokens> {
        self.with_bucket(key, |bucket| bucket.try_acquire(self.clock.now()))
    }

    /// Current token count of `key`'s bucket, with elapsed time credited.
    pub fn tokens(&self, key: &str) -> Option<u64> {
        let now = self.clock.now();
        self.read_buckets().get(key).map(|bucket| bucket.tokens(now))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.read_buckets().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read_buckets().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_buckets().is_empty()
    }

    fn with_bucket<R>(&self, key: &str, f: impl FnOnce(&TokenBucket) -> R) -> R {
        {
            let buckets = self.read_buckets();
            if let Some(bucket) = buckets.get(key) {
                return f(bucket);
            }
        }

        // Another caller may have inserted the key between the two locks,
        // so the entry is checked again under the write lock.
        let mut buckets = self.write_buckets();
        let bucket = match buckets.entry(key.to_owned()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                debug!("Creating a token bucket for {key}");
                entry.insert(TokenBucket::new(self.config, self.clock.now()))
            }
        };
        f(bucket)
    }

    fn read_buckets(&self) -> RwLockReadGuard<'_, HashMap<Key, TokenBucket>> {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_buckets(&self) -> RwLockWriteGuard<'_, HashMap<Key, TokenBucket>> {
        self.buckets.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::Duration,
    };

    use super::{clock::manual::ManualClock, KeyedRateLimiter};
    use crate::{config::LimiterConfig, error::InsufficientTokens};

    fn limiter(quota: u64) -> (KeyedRateLimiter<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let config = LimiterConfig::new(quota, 1).unwrap();
        (KeyedRateLimiter::with_clock(config, clock.clone()), clock)
    }

    #[test]
    fn test_rate_limiter_consumes_quota_then_denies() {
        let ip = "192.23.11.1";
        let (limiter, clock) = limiter(4);
        for _ in 0..4 {
            assert!(limiter.try_acquire(ip).is_ok());
        }
        assert_eq!(limiter.try_acquire(ip), Err(InsufficientTokens::new(1)));

        clock.advance(Duration::from_secs(1));
        assert!(limiter.try_acquire(ip).is_ok());
    }

    #[test]
    fn test_tokens_reflect_refill_before_the_next_acquire() {
        let (limiter, clock) = limiter(2);
        limiter.try_acquire("key").unwrap();
        limiter.try_acquire("key").unwrap();
        assert_eq!(limiter.tokens("key"), Some(0));

        clock.advance(Duration::from_secs(1));
        assert_eq!(limiter.tokens("key"), Some(1000));
        assert!(limiter.try_acquire("key").is_ok());
        assert_eq!(limiter.tokens("key"), Some(500));
    }

    #[test]
    fn test_keys_are_limited_independently() {
        let (limiter, _clock) = limiter(2);
        for _ in 0..10 {
            let _ = limiter.try_acquire("B");
        }
        assert!(limiter.try_acquire("B").is_err());

        assert!(limiter.try_acquire("A").is_ok());
        assert!(limiter.try_acquire("A").is_ok());
        assert!(limiter.try_acquire("A").is_err());
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn test_ensure_bucket_does_not_reset_existing_bucket() {
        let (limiter, _clock) = limiter(4);
        assert!(limiter.is_empty());
        assert_eq!(limiter.tokens("key"), None);

        limiter.ensure_bucket("key");
        assert_eq!(limiter.tokens("key"), Some(1000));

        limiter.try_acquire("key").unwrap();
        limiter.ensure_bucket("key");
        limiter.ensure_bucket("key");
        assert_eq!(limiter.tokens("key"), Some(750));
        assert_eq!(limiter.len(), 1);
        assert!(limiter.contains_key("key"));
    }

    #[test]
    fn test_concurrent_acquires_never_over_admit() {
        let (limiter, _clock) = limiter(4);
        let admitted = AtomicUsize::new(0);
        let denied = AtomicUsize::new(0);

        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..10 {
                        match limiter.try_acquire("shared") {
                            Ok(_) => admitted.fetch_add(1, Ordering::SeqCst),
                            Err(_) => denied.fetch_add(1, Ordering::SeqCst),
                        };
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 4);
        assert_eq!(denied.load(Ordering::SeqCst), 76);
        assert_eq!(limiter.tokens("shared"), Some(0));
    }

    #[test]
    fn test_concurrent_first_sight_creates_one_bucket() {
        let (limiter, _clock) = limiter(4);

        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    limiter.ensure_bucket("new-key");
                    let _ = limiter.try_acquire("new-key");
                });
            }
        });

        assert_eq!(limiter.len(), 1);
        assert_eq!(limiter.tokens("new-key"), Some(0));
    }

    #[test]
    fn test_rate_limiter_refills_with_the_system_clock() {
        let limiter = KeyedRateLimiter::new(LimiterConfig::new(1, 1).unwrap());
        assert!(limiter.try_acquire("127.0.0.1").is_ok());
        assert!(limiter.try_acquire("127.0.0.1").is_err());

        thread::sleep(Duration::from_millis(1100));
        assert!(limiter.try_acquire("127.0.0.1").is_ok());
    }
}
