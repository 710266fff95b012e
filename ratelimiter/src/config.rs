use std::{env, time::Duration};

use crate::error::ConfigError;

/// Scale factor applied to every token amount so that a bucket can hand out
/// fractions of a window with integer arithmetic.
pub const TOKEN_GRANULARITY: u64 = 1000;

pub const DEFAULT_QUOTA: u64 = 4;
pub const DEFAULT_INTERVAL_SECS: u64 = 1;

pub const QUOTA_VAR: &str = "RATELIMIT_QUOTA";
pub const INTERVAL_VAR: &str = "RATELIMIT_INTERVAL_SECS";

/// How many admissions (`quota`) a single key gets every `interval_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterConfig {
    quota: u64,
    interval_secs: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            quota: DEFAULT_QUOTA,
            interval_secs: DEFAULT_INTERVAL_SECS,
        }
    }
}

impl LimiterConfig {
    pub fn new(quota: u64, interval_secs: u64) -> Result<Self, ConfigError> {
        if quota == 0 {
            return Err(ConfigError::ZeroQuota);
        }
        if interval_secs == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        let capacity = interval_secs
            .checked_mul(TOKEN_GRANULARITY)
            .ok_or(ConfigError::IntervalTooLarge(interval_secs))?;
        // a quota above the capacity would make every admission free
        if quota > capacity {
            return Err(ConfigError::QuotaTooLarge { quota, capacity });
        }
        // refill_rate is computed as capacity * quota / interval
        capacity
            .checked_mul(quota)
            .ok_or(ConfigError::IntervalTooLarge(interval_secs))?;
        Ok(Self {
            quota,
            interval_secs,
        })
    }

    /// Reads `RATELIMIT_QUOTA` and `RATELIMIT_INTERVAL_SECS`, falling back to
    /// the defaults for whichever is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env::var)
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Result<String, env::VarError>,
    {
        let quota = read_var(&lookup, QUOTA_VAR, DEFAULT_QUOTA)?;
        let interval_secs = read_var(&lookup, INTERVAL_VAR, DEFAULT_INTERVAL_SECS)?;
        Self::new(quota, interval_secs)
    }

    pub fn quota(&self) -> u64 {
        self.quota
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Burst size of a bucket, in tokens.
    pub fn capacity(&self) -> u64 {
        self.interval_secs * TOKEN_GRANULARITY
    }

    /// Tokens spent by one admission.
    pub fn refill_step(&self) -> u64 {
        self.capacity() / self.quota
    }

    /// Tokens credited per whole elapsed second.
    pub fn refill_rate(&self) -> u64 {
        self.capacity() * self.quota / self.interval_secs
    }
}

fn read_var<F>(lookup: &F, name: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&'static str) -> Result<String, env::VarError>,
{
    match lookup(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Unparseable { name, value }),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(env::VarError::NotUnicode(value)) => Err(ConfigError::Unparseable {
            name,
            value: value.to_string_lossy().into_owned(),
        }),
    }
}
