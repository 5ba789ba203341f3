//! Facade (spec §4.2): the application-visible entry point per entity.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::warn;

use crate::cache_store::CacheStoreAdapter;
use crate::codec::{EntityCodec, JsonCodec};
use crate::entity::{CacheFormat, Entity};
use crate::envelope::Intent;
use crate::error::CoreError;
use crate::policy::PolicyRegistry;
use crate::primary_store::PrimaryStoreAdapter;
use crate::producer::StreamProducer;

/// Type alias for the in-flight read-coalescing map, one entry per cache key.
type InFlightMap = DashMap<String, Arc<Mutex<()>>>;

/// RAII cleanup guard so a coalescing entry is removed even on early
/// return or panic (mirrors the teacher's `CleanupGuard` in `cache_manager.rs`).
struct CleanupGuard<'a> {
    map: &'a InFlightMap,
    key: String,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

/// Per-entity application-visible entry point: `save`, `findById`, `delete`.
pub struct Facade<E: Entity> {
    cache: Arc<dyn CacheStoreAdapter<E>>,
    primary_stores: Vec<Arc<dyn PrimaryStoreAdapter<E>>>,
    producer: Option<StreamProducer>,
    in_flight: InFlightMap,
}

impl<E: Entity> Facade<E> {
    #[must_use]
    pub fn new(
        cache: Arc<dyn CacheStoreAdapter<E>>,
        primary_stores: Vec<Arc<dyn PrimaryStoreAdapter<E>>>,
        producer: Option<StreamProducer>,
    ) -> Self {
        Self {
            cache,
            primary_stores,
            producer,
            in_flight: DashMap::new(),
        }
    }

    /// The primary store read-through uses on a cache miss. Spec §4.2 names
    /// "the primary store" in the singular; when several are bound we read
    /// through the first registered one (the store of record), since §4.8's
    /// fan-out-and-aggregate behavior is specified for the Processor's
    /// writes, not for the Facade's reads.
    fn read_through_store(&self) -> Option<&Arc<dyn PrimaryStoreAdapter<E>>> {
        self.primary_stores.first()
    }

    /// `save(e)` (spec §4.2).
    ///
    /// Under `WRITE_BEHIND`, encodes and appends to the stream, returning
    /// as soon as the append is acknowledged by the server — store errors
    /// downstream are the consumer's problem, never surfaced here. Encoding
    /// errors are fatal (`BadPayload`). Without `WRITE_BEHIND`, writes
    /// synchronously to the cache store only (spec §4.2: "Else write
    /// synchronously to the cache store via 4.7" — the primary store is
    /// written by the caller outside this facade in that mode). Per spec
    /// §7, a `CacheUnavailable` write failure is a logged no-op rather than
    /// a surfaced error.
    pub async fn save(&self, entity: &E) -> Result<(), CoreError> {
        if PolicyRegistry::has_write_behind::<E>() {
            let producer = self.producer.as_ref().ok_or_else(producer_missing::<E>)?;
            let content = encode_content(entity)?;
            producer
                .append(Intent::upsert_fields(content))
                .await
                .map(|_stream_id| ())?;
            return Ok(());
        }

        match self.cache.save(entity).await {
            Ok(_) => Ok(()),
            Err(CoreError::CacheUnavailable { source }) => {
                warn!(error = %source, id = %entity.id(), "cache unavailable, save treated as a no-op");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// `findById(id)` (spec §4.2).
    pub async fn find_by_id(&self, id: &E::Id) -> Result<Option<E>, CoreError> {
        let cache_result = self.cache.find_by_id(id).await;

        let read_through_enabled =
            PolicyRegistry::has_cache_aside::<E>() || PolicyRegistry::has_refresh_ahead::<E>();

        let cache_error = match cache_result {
            Ok(Some(entity)) => return Ok(Some(entity)),
            Ok(None) => None,
            Err(err) if !read_through_enabled => return Err(err),
            Err(err) => Some(err),
        };

        if !read_through_enabled {
            return Ok(None);
        }

        let Some(primary) = self.read_through_store() else {
            return match cache_error {
                Some(err) => Err(err),
                None => Ok(None),
            };
        };

        let key = id.to_string();
        let lock = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;
        let _cleanup = CleanupGuard {
            map: &self.in_flight,
            key: key.clone(),
        };

        match primary.find_by_id(id).await {
            Ok(Some(entity)) => {
                // Invariant 5 (spec §3): a successful primary read is
                // written back to the cache before being returned.
                if let Err(e) = self.cache.save(&entity).await {
                    warn!(error = %e, id = %id, "cache write-back failed, returning uncached value");
                }
                Ok(Some(entity))
            }
            Ok(None) => Ok(None),
            Err(primary_err) => match cache_error {
                Some(cache_err) => Err(CoreError::StoreUnavailable {
                    store: "cache+primary",
                    source: anyhow::anyhow!("cache: {cache_err}; primary: {primary_err}"),
                }),
                // Spec §4.2: a primary-store failure on a clean cache miss
                // (the cache itself did not fail) must not surface here.
                None => Ok(None),
            },
        }
    }

    /// `delete(id)` (spec §4.2). Per spec §7, a `CacheUnavailable` delete
    /// failure is a logged no-op rather than a surfaced error.
    pub async fn delete(&self, id: &E::Id) -> Result<(), CoreError> {
        if PolicyRegistry::has_write_behind::<E>() {
            let producer = self.producer.as_ref().ok_or_else(producer_missing::<E>)?;
            producer.append(Intent::delete_fields(id)).await.map(|_| ())?;
            return Ok(());
        }

        match self.cache.delete_by_id(id).await {
            Ok(()) => Ok(()),
            Err(CoreError::CacheUnavailable { source }) => {
                warn!(error = %source, id = %id, "cache unavailable, delete treated as a no-op");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// `WRITE_BEHIND` declared without a producer wired up is a registration
/// bug (see `CoreBuilder::register_write_behind`), not a runtime condition
/// a caller can recover from — surfaced as `PolicyMisconfigured` rather
/// than a panic.
fn producer_missing<E: Entity>() -> CoreError {
    CoreError::PolicyMisconfigured {
        entity: E::type_name(),
        reason: "WRITE_BEHIND is enabled but no stream producer is configured".to_string(),
    }
}

/// Encode an entity to its stream `content` field per its declared format.
pub(crate) fn encode_content<E: Entity>(entity: &E) -> Result<String, CoreError> {
    use crate::codec::HashCodec;

    let format = PolicyRegistry::resolve::<E>().format;
    let result = match format {
        CacheFormat::Json => EntityCodec::<E>::to_content(&JsonCodec, entity),
        CacheFormat::Hash => EntityCodec::<E>::to_content(&HashCodec, entity),
    };
    result.map_err(|source| CoreError::BadPayload {
        entity: E::type_name(),
        source,
    })
}
