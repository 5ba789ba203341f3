//! Runtime configuration for the write-behind pipeline and stream consumer.
//!
//! Mirrors the teacher's habit of reading a handful of environment
//! variables with a sensible default (`L2Cache::new`, `RedisCache::new`
//! both do `std::env::var(..).unwrap_or_else(|_| default.to_string())`)
//! rather than pulling in a config-file crate. The dotted keys from
//! spec §6 are expressed here as one struct with one `from_env()`
//! constructor; each field keeps the default from the spec's table.

use std::time::Duration;

/// Environment variable carrying the Redis connection string.
pub const REDIS_URL_VAR: &str = "REDIS_URL";
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Tunables for the pending-entry reaper and stream consumer.
///
/// Field names follow the dotted config keys from spec §6
/// (`listener.pel.max-attempts` etc.) translated to
/// `SCREAMING_SNAKE_CASE` environment variables.
#[derive(Debug, Clone, Copy)]
pub struct CoreConfig {
    /// `listener.pel.max-attempts` — attempts before DLQ. Default 3.
    pub max_attempts: u32,
    /// `listener.pel.max-retention` — TTL of the retry counter, and the
    /// oldest-retry horizon. Default 120_000ms.
    pub max_retention: Duration,
    /// `listener.pel.batch-size` — pending entries inspected per tick.
    /// Default 50.
    pub reaper_batch_size: usize,
    /// `listener.pel.fixed-delay` — period of the reaper task. Default
    /// 300_000ms.
    pub reaper_interval: Duration,
    /// `stream.poll-timeout` — consumer poll bound. Default 1_000ms.
    pub poll_timeout: Duration,
    /// `stream.batch-size` — consumer read batch. Default 100.
    pub stream_batch_size: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_retention: Duration::from_millis(120_000),
            reaper_batch_size: 50,
            reaper_interval: Duration::from_millis(300_000),
            poll_timeout: Duration::from_millis(1_000),
            stream_batch_size: 100,
        }
    }
}

impl CoreConfig {
    /// Load from environment variables, falling back to the spec's
    /// defaults for anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_attempts: env_u32(
                "LISTENER_PEL_MAX_ATTEMPTS",
                default.max_attempts,
            ),
            max_retention: env_millis(
                "LISTENER_PEL_MAX_RETENTION",
                default.max_retention,
            ),
            reaper_batch_size: env_usize(
                "LISTENER_PEL_BATCH_SIZE",
                default.reaper_batch_size,
            ),
            reaper_interval: env_millis(
                "LISTENER_PEL_FIXED_DELAY",
                default.reaper_interval,
            ),
            poll_timeout: env_millis("STREAM_POLL_TIMEOUT", default.poll_timeout),
            stream_batch_size: env_usize("STREAM_BATCH_SIZE", default.stream_batch_size),
        }
    }

    /// Read `REDIS_URL`, falling back to the local default.
    #[must_use]
    pub fn redis_url() -> String {
        std::env::var(REDIS_URL_VAR).unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string())
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
