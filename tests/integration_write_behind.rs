//! Integration tests for the write-behind pipeline (spec §8 end-to-end
//! scenarios). Requires a live Redis-compatible server at `REDIS_URL`
//! (defaults to `redis://127.0.0.1:6379`), same as the teacher's
//! `integration_streams.rs`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::test_data::{Employer, EmployerRepository, Product, ProductRepository};
use common::{redis_url, setup_system, unique_id, wait_for};
use redis_cache_patterns::{
    CoreBuilder, CoreConfig, CoreError, Entity, InMemoryStore, PrimaryStoreAdapter,
};

#[tokio::test]
async fn save_is_applied_to_the_primary_store_by_the_consumer() {
    let system = setup_system().await.expect("failed to connect");
    let primary: Arc<InMemoryStore<Employer>> = Arc::new(InMemoryStore::new("employer-sql"));
    let stores: Vec<Arc<dyn PrimaryStoreAdapter<Employer>>> = vec![primary.clone()];

    let handles = system
        .builder()
        .register_write_behind::<Employer, EmployerRepository>(stores);

    let id = unique_id();
    let employer = Employer {
        id,
        ..Employer::new(id)
    };
    handles.facade.save(&employer).await.expect("save failed");

    let applied = wait_for(|| primary.snapshot().contains_key(&id.to_string()), 5_000).await;
    assert!(applied, "consumer did not apply the write within 5s");

    let stored = primary.snapshot();
    assert_eq!(stored.get(&id.to_string()), Some(&employer));

    handles.shutdown().await;
}

#[tokio::test]
async fn save_populates_the_cache_store_so_reads_hit_without_the_primary() {
    let system = setup_system().await.expect("failed to connect");
    let primary: Arc<InMemoryStore<Employer>> = Arc::new(InMemoryStore::new("employer-sql"));
    let stores: Vec<Arc<dyn PrimaryStoreAdapter<Employer>>> = vec![primary.clone()];

    let handles = system
        .builder()
        .register_write_behind::<Employer, EmployerRepository>(stores);

    let id = unique_id();
    let employer = Employer {
        id,
        ..Employer::new(id)
    };
    handles.facade.save(&employer).await.expect("save failed");

    let cached = wait_for(|| primary.snapshot().contains_key(&id.to_string()), 5_000).await;
    assert!(cached, "write was never applied");

    let found = handles
        .facade
        .find_by_id(&id)
        .await
        .expect("find_by_id failed");
    assert_eq!(found, Some(employer));

    handles.shutdown().await;
}

#[tokio::test]
async fn delete_removes_the_entry_from_the_primary_store() {
    let system = setup_system().await.expect("failed to connect");
    let primary: Arc<InMemoryStore<Employer>> = Arc::new(InMemoryStore::new("employer-sql"));
    let stores: Vec<Arc<dyn PrimaryStoreAdapter<Employer>>> = vec![primary.clone()];

    let handles = system
        .builder()
        .register_write_behind::<Employer, EmployerRepository>(stores);

    let id = unique_id();
    let employer = Employer {
        id,
        ..Employer::new(id)
    };
    handles.facade.save(&employer).await.expect("save failed");
    wait_for(|| primary.snapshot().contains_key(&id.to_string()), 5_000).await;

    handles.facade.delete(&id).await.expect("delete failed");
    let removed = wait_for(|| !primary.snapshot().contains_key(&id.to_string()), 5_000).await;
    assert!(removed, "consumer did not apply the delete within 5s");

    handles.shutdown().await;
}

#[tokio::test]
async fn hash_format_entities_round_trip_through_write_behind() {
    let system = setup_system().await.expect("failed to connect");
    let primary: Arc<InMemoryStore<Product>> = Arc::new(InMemoryStore::new("product-sql"));
    let stores: Vec<Arc<dyn PrimaryStoreAdapter<Product>>> = vec![primary.clone()];

    let handles = system
        .builder()
        .register_write_behind::<Product, ProductRepository>(stores);

    let id = unique_id();
    let product = Product {
        id,
        ..Product::new(id)
    };
    handles.facade.save(&product).await.expect("save failed");

    let applied = wait_for(|| primary.snapshot().contains_key(&id.to_string()), 5_000).await;
    assert!(applied, "consumer did not apply the HASH-format write within 5s");
    assert_eq!(primary.snapshot().get(&id.to_string()), Some(&product));

    handles.shutdown().await;
}

/// A primary store that always fails, used to force a pending entry all
/// the way through to the dead-letter stream (spec §8 "poison entry").
struct AlwaysFailingStore;

#[redis_cache_patterns::async_trait]
impl PrimaryStoreAdapter<Employer> for AlwaysFailingStore {
    async fn find_by_id(&self, _id: &u64) -> Result<Option<Employer>, CoreError> {
        Ok(None)
    }

    async fn save(&self, _entity: &Employer) -> Result<Employer, CoreError> {
        Err(CoreError::StoreUnavailable {
            store: "always-failing-store",
            source: anyhow::anyhow!("simulated persistent failure"),
        })
    }

    async fn delete_by_id(&self, _id: &u64) -> Result<(), CoreError> {
        Ok(())
    }

    async fn health_check(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "always-failing-store"
    }
}

#[tokio::test]
async fn a_poison_entry_exhausts_its_attempts_and_lands_on_the_dlq() {
    // Fast reaper settings so the test doesn't wait on the 300s default.
    let config = CoreConfig {
        max_attempts: 2,
        reaper_interval: Duration::from_millis(200),
        reaper_batch_size: 10,
        ..CoreConfig::default()
    };
    let builder = CoreBuilder::connect(&redis_url(), config)
        .await
        .expect("failed to connect");

    let stores: Vec<Arc<dyn PrimaryStoreAdapter<Employer>>> = vec![Arc::new(AlwaysFailingStore)];
    let handles = builder.register_write_behind::<Employer, EmployerRepository>(stores);

    let id = unique_id();
    let employer = Employer {
        id,
        ..Employer::new(id)
    };
    handles.facade.save(&employer).await.expect("save failed");

    // Give the consumer a chance to fail once, then the reaper at least
    // `max_attempts` ticks to exhaust retries and move the entry to DLQ.
    let client = redis::Client::open(redis_url()).expect("failed to open client");
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .expect("failed to connect");

    let dlq_stream = redis_cache_patterns::names::dlq_stream(Employer::type_name());
    let found_in_dlq = wait_for_async(
        || {
            let dlq_stream = dlq_stream.clone();
            let mut conn = conn.clone();
            async move {
                let entries: Vec<(String, std::collections::HashMap<String, String>)> =
                    redis::cmd("XRANGE")
                        .arg(&dlq_stream)
                        .arg("-")
                        .arg("+")
                        .query_async(&mut conn)
                        .await
                        .unwrap_or_default();
                entries
                    .iter()
                    .any(|(_id, fields)| fields.get("content").map(String::as_str) == Some(&employer_content(&employer)))
            }
        },
        3_000,
    )
    .await;

    assert!(found_in_dlq, "poison entry never reached the dead-letter stream");

    handles.shutdown().await;
}

fn employer_content(employer: &Employer) -> String {
    serde_json::to_string(employer).expect("serialize employer")
}

/// Async variant of `wait_for` for conditions that themselves need to
/// await (here, a Redis round-trip per poll).
async fn wait_for_async<F, Fut>(mut condition: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
