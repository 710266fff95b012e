use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use crate::{config::LimiterConfig, error::InsufficientTokens};

/// A successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admitted {
    remaining: u64,
}

impl Admitted {
    /// Whole admissions still available right after this one, before any refill.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

/// Token bucket that refills lazily, when it is queried, instead of on a timer.
///
/// Only whole elapsed seconds are credited: two queries 0.9s apart see no
/// refill between them, and the fraction is not carried over.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u64,
    refill_step: u64,
    refill_rate: u64,
    data: Mutex<TokenBucketData>,
}

#[derive(Debug, Clone, Copy)]
struct TokenBucketData {
    num_of_tokens: u64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket.
    pub fn new(config: LimiterConfig, now: Instant) -> Self {
        let capacity = config.capacity();
        TokenBucket {
            capacity,
            refill_step: config.refill_step(),
            refill_rate: config.refill_rate(),
            data: Mutex::new(TokenBucketData {
                num_of_tokens: capacity,
                last_refill: now,
            }),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn refill_step(&self) -> u64 {
        self.refill_step
    }

    pub fn refill_rate(&self) -> u64 {
        self.refill_rate
    }

    /// Token count at `now`, after crediting the whole seconds elapsed since the last refill.
    pub fn tokens(&self, now: Instant) -> u64 {
        let mut data = self.lock();
        self.refill(&mut data, now);
        data.num_of_tokens
    }

    pub fn try_acquire(&self, now: Instant) -> Result<Admitted, InsufficientTokens> {
        let mut data = self.lock();
        self.refill(&mut data, now);

        if data.num_of_tokens < self.refill_step {
            let missing = self.refill_step - data.num_of_tokens;
            let retry_after_secs = missing.div_ceil(self.refill_rate).max(1);
            return Err(InsufficientTokens::new(retry_after_secs));
        }
        data.num_of_tokens -= self.refill_step;
        Ok(Admitted {
            remaining: data.num_of_tokens / self.refill_step,
        })
    }

    fn refill(&self, data: &mut TokenBucketData, now: Instant) {
        let elapsed_secs = now.saturating_duration_since(data.last_refill).as_secs();
        if elapsed_secs > 0 {
            data.num_of_tokens = data
                .num_of_tokens
                .saturating_add(elapsed_secs.saturating_mul(self.refill_rate));
            data.last_refill = now;
        }
        data.num_of_tokens = data.num_of_tokens.min(self.capacity);
    }

    // Every critical section leaves the data consistent, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, TokenBucketData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
