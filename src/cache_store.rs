//! Cache Store Adapter (spec §4.7).
//!
//! Grounded on the teacher's `RedisCache`/`L2CacheBackend` shape
//! (`backends/redis_cache.rs`, `traits.rs`): one shared
//! `redis::aio::ConnectionManager`, cloned per call, `tracing` for
//! diagnostics, `anyhow::Context` on every fallible Redis call.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use crate::codec::{EntityCodec, HashCodec, JsonCodec};
use crate::entity::{CacheFormat, Entity};
use crate::envelope::names;
use crate::error::CoreError;
use crate::policy::PolicyRegistry;

/// Per-entity key/value facade the Facade and Processor consume (spec §4.7).
#[async_trait]
pub trait CacheStoreAdapter<E: Entity>: Send + Sync {
    async fn find_by_id(&self, id: &E::Id) -> Result<Option<E>, CoreError>;
    async fn save(&self, entity: &E) -> Result<E, CoreError>;
    async fn delete_by_id(&self, id: &E::Id) -> Result<(), CoreError>;
    async fn health_check(&self) -> bool;
}

/// Redis-backed [`CacheStoreAdapter`], storing `JSON` entities as plain
/// string values and `HASH` entities via `HSET`, per spec §4.7/§3.
pub struct RedisCacheStore<E: Entity> {
    conn: ConnectionManager,
    json: JsonCodec,
    hash: HashCodec,
    _entity: PhantomData<E>,
}

impl<E: Entity> RedisCacheStore<E> {
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            json: JsonCodec,
            hash: HashCodec,
            _entity: PhantomData,
        }
    }

    fn key(&self, id: &E::Id) -> String {
        names::cache_key(PolicyRegistry::prefix::<E>(), id)
    }

    fn ttl(&self) -> Option<Duration> {
        PolicyRegistry::resolve::<E>().ttl
    }

    fn cache_unavailable(source: anyhow::Error) -> CoreError {
        CoreError::CacheUnavailable { source }
    }

    fn bad_payload(source: anyhow::Error) -> CoreError {
        CoreError::BadPayload {
            entity: E::type_name(),
            source,
        }
    }
}

#[async_trait]
impl<E: Entity> CacheStoreAdapter<E> for RedisCacheStore<E> {
    async fn find_by_id(&self, id: &E::Id) -> Result<Option<E>, CoreError> {
        let key = self.key(id);
        let mut conn = self.conn.clone();

        match PolicyRegistry::resolve::<E>().format {
            CacheFormat::Json => {
                let raw: Option<String> = conn
                    .get(&key)
                    .await
                    .map_err(|e| Self::cache_unavailable(e.into()))?;
                match raw {
                    Some(content) => {
                        let entity = EntityCodec::<E>::from_content(&self.json, &content)
                            .map_err(Self::bad_payload)?;
                        debug!(key = %key, "cache store hit");
                        Ok(Some(entity))
                    }
                    None => Ok(None),
                }
            }
            CacheFormat::Hash => {
                let fields: HashMap<String, String> = conn
                    .hgetall(&key)
                    .await
                    .map_err(|e| Self::cache_unavailable(e.into()))?;
                if fields.is_empty() {
                    return Ok(None);
                }
                let entity = self.hash.from_field_map(&fields).map_err(Self::bad_payload)?;
                debug!(key = %key, "cache store hit");
                Ok(Some(entity))
            }
        }
    }

    async fn save(&self, entity: &E) -> Result<E, CoreError> {
        let key = self.key(&entity.id());
        let mut conn = self.conn.clone();
        let ttl = self.ttl();

        match PolicyRegistry::resolve::<E>().format {
            CacheFormat::Json => {
                let content = EntityCodec::<E>::to_content(&self.json, entity)
                    .map_err(Self::bad_payload)?;
                match ttl {
                    Some(ttl) => conn
                        .set_ex::<_, _, ()>(&key, content, ttl.as_secs())
                        .await
                        .map_err(|e| Self::cache_unavailable(e.into()))?,
                    None => conn
                        .set::<_, _, ()>(&key, content)
                        .await
                        .map_err(|e| Self::cache_unavailable(e.into()))?,
                }
            }
            CacheFormat::Hash => {
                let fields = self.hash.to_field_map(entity).map_err(Self::bad_payload)?;
                let pairs: Vec<(String, String)> = fields.into_iter().collect();
                conn.hset_multiple::<_, _, _, ()>(&key, &pairs)
                    .await
                    .map_err(|e| Self::cache_unavailable(e.into()))?;
                if let Some(ttl) = ttl {
                    conn.expire::<_, ()>(&key, ttl.as_secs() as i64)
                        .await
                        .map_err(|e| Self::cache_unavailable(e.into()))?;
                }
            }
        }

        debug!(key = %key, "cache store write");
        Ok(entity.clone())
    }

    async fn delete_by_id(&self, id: &E::Id) -> Result<(), CoreError> {
        let key = self.key(id);
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&key)
            .await
            .map_err(|e| Self::cache_unavailable(e.into()))?;
        debug!(key = %key, "cache store delete");
        Ok(())
    }

    async fn health_check(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }
}
