//! Common utilities for integration tests (require a live Redis-compatible
//! server reachable at `REDIS_URL`, exactly like the teacher's
//! `tests/common/mod.rs`).

use anyhow::Result;
use redis_cache_patterns::{
    CacheFormat, CachingPolicy, CoreSystem, Entity, Pattern, Repository,
};

/// Get the Redis URL from the environment or fall back to the local default.
pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// A unique id per test run, so parallel tests never collide on the same
/// cache key or stream entry.
pub fn unique_id() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    (nanos as u64) ^ u64::from(rand::random::<u32>())
}

/// Connect a [`CoreSystem`] against `REDIS_URL`.
pub async fn setup_system() -> Result<CoreSystem> {
    CoreSystem::with_redis_url(&redis_url()).await
}

/// Wait for a condition with a timeout, polling every 10ms — used to wait
/// for the write-behind pipeline to apply an entry asynchronously.
pub async fn wait_for<F>(mut condition: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    use tokio::time::{sleep, Duration};

    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }

    false
}

/// Test entities and repositories used across the integration suite.
pub mod test_data {
    use super::{CacheFormat, CachingPolicy, Entity, Pattern, Repository};
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Employer {
        pub id: u64,
        pub name: String,
        pub industry: String,
    }

    impl Employer {
        pub fn new(id: u64) -> Self {
            Self {
                id,
                name: format!("Employer {id}"),
                industry: "manufacturing".to_string(),
            }
        }
    }

    impl Entity for Employer {
        type Id = u64;
        fn id(&self) -> u64 {
            self.id
        }
        fn type_name() -> &'static str {
            "employer"
        }
        fn policy() -> CachingPolicy {
            CachingPolicy::new(
                &[Pattern::CacheAside, Pattern::WriteBehind, Pattern::RefreshAhead],
                CacheFormat::Json,
            )
            .with_ttl(Duration::from_secs(60))
        }
    }

    pub struct EmployerRepository;
    impl Repository for EmployerRepository {
        fn type_name() -> &'static str {
            "employerrepository"
        }
    }

    /// A `HASH`-formatted entity, used to exercise the other codec path.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Product {
        pub id: u64,
        pub name: String,
        pub price_cents: u64,
    }

    impl Product {
        pub fn new(id: u64) -> Self {
            Self {
                id,
                name: format!("Product {id}"),
                price_cents: 999 + id,
            }
        }
    }

    impl Entity for Product {
        type Id = u64;
        fn id(&self) -> u64 {
            self.id
        }
        fn type_name() -> &'static str {
            "product"
        }
        fn policy() -> CachingPolicy {
            CachingPolicy::new(&[Pattern::WriteBehind], CacheFormat::Hash)
        }
    }

    pub struct ProductRepository;
    impl Repository for ProductRepository {
        fn type_name() -> &'static str {
            "productrepository"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_ids_do_not_collide_across_consecutive_calls() {
        let a = unique_id();
        let b = unique_id();
        assert_ne!(a, b);
    }
}
