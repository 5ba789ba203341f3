//! Basic Usage Example
//!
//! Demonstrates registering an entity under all three caching patterns
//! and driving it through the cache-aside read path.
//!
//! Run with: cargo run --example basic_usage

use std::sync::Arc;
use std::time::Duration;

use redis_cache_patterns::{
    CacheFormat, CachingPolicy, CoreSystem, Entity, InMemoryStore, Pattern, PrimaryStoreAdapter,
    Repository,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Employer {
    id: u64,
    name: String,
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

struct EmployerRepository;
impl Repository for EmployerRepository {
    fn type_name() -> &'static str {
        "employerrepository"
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("=== redis-cache-patterns: Basic Usage ===\n");

    // 1. Connect using REDIS_URL (falls back to redis://127.0.0.1:6379).
    let system = CoreSystem::connect().await?;

    if system.health_check().await {
        println!("Redis connection is healthy\n");
    }

    // 2. Register the entity against one target store, wiring the stream
    //    producer, consumer, processor and pending reaper.
    let primary: Arc<dyn PrimaryStoreAdapter<Employer>> =
        Arc::new(InMemoryStore::new("employer-sql"));
    let handles = system
        .builder()
        .register_write_behind::<Employer, EmployerRepository>(vec![primary]);

    // 3. Also start the refresh-ahead expiration listener for this entity.
    let refresh_ahead = system
        .builder()
        .register_expiration_listener::<Employer>(handles.facade.clone())
        .await?;

    // 4. Save returns as soon as the intent is durably appended; the
    //    consumer applies it to the primary store asynchronously.
    let employer = Employer {
        id: 1,
        name: "Acme Manufacturing".to_string(),
    };
    handles.facade.save(&employer).await?;
    println!("Appended save(employer:1) to the write-behind stream");

    // Give the background consumer a moment to drain the stream before
    // reading it back.
    tokio::time::sleep(Duration::from_millis(200)).await;

    if let Some(found) = handles.facade.find_by_id(&1).await? {
        println!("Read back: {found:?}");
    }

    refresh_ahead.shutdown();
    refresh_ahead.join().await;
    handles.shutdown().await;

    Ok(())
}
