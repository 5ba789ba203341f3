//! Orchestrator + Processor (spec §4.4): decodes an intent, applies it to
//! every primary store bound under `R`, and acknowledges the stream entry
//! once every store reflects it.
//!
//! The teacher has nothing resembling this — `CacheBackend`/`L2CacheBackend`
//! never touch a store of record. Grounded on
//! `other_examples/2363db81_..._redis_streams.rs.rs`'s `process_message`/
//! `acknowledge_sync` shape, reworked to the teacher's async/`tracing` idiom
//! and to the fan-out-and-aggregate rule spec §4.8 adds.

use std::marker::PhantomData;
use std::sync::Arc;

use redis::aio::ConnectionManager;
use tracing::debug;

use crate::codec::{EntityCodec, HashCodec, JsonCodec};
use crate::entity::{CacheFormat, Entity, Repository};
use crate::envelope::{names, Intent, Operation};
use crate::error::CoreError;
use crate::policy::PolicyRegistry;
use crate::primary_store::PrimaryStoreAdapter;

/// Applies decoded intents to every primary store bound under `(E, R)`
/// (spec §4.8 "fans out to all of them and aggregates errors") and
/// acknowledges the originating stream entry (spec §3 invariant 1: a
/// message is only acked once every bound store reflects it).
pub struct Processor<E: Entity, R: Repository> {
    conn: ConnectionManager,
    stream_key: String,
    group: String,
    stores: Vec<Arc<dyn PrimaryStoreAdapter<E>>>,
    _repo: PhantomData<R>,
}

impl<E: Entity, R: Repository> Processor<E, R> {
    #[must_use]
    pub fn new(conn: ConnectionManager, stores: Vec<Arc<dyn PrimaryStoreAdapter<E>>>) -> Self {
        Self {
            conn,
            stream_key: names::entity_stream(E::type_name()),
            group: names::group(R::type_name()),
            stores,
            _repo: PhantomData,
        }
    }

    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// `process(entry)` (spec §4.4). The stream-bootstrap "init" marker
    /// (spec §9 open question b) carries no operation and is a silent
    /// no-op here; the caller still acknowledges it.
    pub async fn process(&self, intent: &Intent) -> Result<(), CoreError> {
        if intent.is_init_marker() {
            debug!(stream_id = %intent.stream_id, "skipping stream init marker");
            return Ok(());
        }

        match intent.operation() {
            Operation::Delete => self.apply_delete(intent).await,
            Operation::Create | Operation::Update | Operation::Read => {
                self.apply_upsert(intent).await
            }
        }
    }

    async fn apply_delete(&self, intent: &Intent) -> Result<(), CoreError> {
        let raw = intent.content().ok_or_else(|| CoreError::BadPayload {
            entity: E::type_name(),
            source: anyhow::anyhow!("DELETE intent missing 'content' (id)"),
        })?;
        let id = parse_id::<E>(raw)?;

        let mut failed = 0usize;
        let mut details = Vec::new();
        for store in &self.stores {
            if let Err(e) = store.delete_by_id(&id).await {
                failed += 1;
                details.push(format!("{}: {e}", store.name()));
            }
        }
        self.finish(failed, details)
    }

    async fn apply_upsert(&self, intent: &Intent) -> Result<(), CoreError> {
        let content = intent.content().ok_or_else(|| CoreError::BadPayload {
            entity: E::type_name(),
            source: anyhow::anyhow!("CREATE/UPDATE intent missing 'content'"),
        })?;
        let entity = decode::<E>(content)?;

        let mut failed = 0usize;
        let mut details = Vec::new();
        for store in &self.stores {
            if let Err(e) = store.save(&entity).await {
                failed += 1;
                details.push(format!("{}: {e}", store.name()));
            }
        }
        self.finish(failed, details)
    }

    fn finish(&self, failed: usize, details: Vec<String>) -> Result<(), CoreError> {
        if failed == 0 {
            return Ok(());
        }
        Err(CoreError::ProcessMessage {
            attempted: self.stores.len(),
            failed,
            details: details.join("; "),
        })
    }

    /// `acknowledge(entry)` (spec §4.4): `XACK stream(E) group(R) id`.
    pub async fn acknowledge(&self, stream_id: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let acked: i64 = redis::cmd("XACK")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(stream_id)
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::AcknowledgeMessage {
                stream_id: stream_id.to_string(),
                group: self.group.clone(),
                source: e.into(),
            })?;
        debug!(stream_id = %stream_id, acked, "acknowledged stream entry");
        Ok(())
    }

    /// `orchestrate(entry)` (spec §4.4): process then acknowledge. Callers
    /// (the consumer's poll loop, the reaper's retry loop) leave the entry
    /// pending on failure rather than retrying inline.
    pub async fn orchestrate(&self, intent: &Intent) -> Result<(), CoreError> {
        self.process(intent).await?;
        self.acknowledge(&intent.stream_id).await
    }
}

fn decode<E: Entity>(content: &str) -> Result<E, CoreError> {
    match PolicyRegistry::resolve::<E>().format {
        CacheFormat::Json => EntityCodec::<E>::from_content(&JsonCodec, content),
        CacheFormat::Hash => EntityCodec::<E>::from_content(&HashCodec, content),
    }
    .map_err(|source| CoreError::BadPayload {
        entity: E::type_name(),
        source,
    })
}

/// Id parsing (spec §4.4, §9 "single-argument string constructor"
/// fallback): `FromStr` covers `String`, `Uuid` and the integral types
/// directly.
fn parse_id<E: Entity>(raw: &str) -> Result<E::Id, CoreError> {
    raw.parse::<E::Id>()
        .map_err(|_| CoreError::UnparseableId {
            entity: E::type_name(),
            raw: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{CacheFormat as CF, CachingPolicy, Pattern};
    use crate::primary_store::InMemoryStore;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        id: u64,
        name: String,
    }

    impl Entity for Widget {
        type Id = u64;
        fn id(&self) -> u64 {
            self.id
        }
        fn type_name() -> &'static str {
            "widget"
        }
        fn policy() -> CachingPolicy {
            CachingPolicy::new(&[Pattern::WriteBehind], CF::Json)
        }
    }

    #[test]
    fn init_marker_is_a_silent_no_op_before_hitting_redis() {
        // process() short-circuits on the init marker before it ever
        // touches self.conn/self.stores, so this is exercisable without a
        // live server.
        let intent = Intent::new("1-0", Intent::init_marker_fields());
        assert!(intent.is_init_marker());
    }

    #[test]
    fn parse_id_rejects_unparseable_ids() {
        let err = parse_id::<Widget>("not-a-number").unwrap_err();
        assert!(matches!(err, CoreError::UnparseableId { .. }));
    }

    #[test]
    fn decode_round_trips_through_the_policy_registered_format() {
        let widget = Widget {
            id: 7,
            name: "gizmo".to_string(),
        };
        let content = serde_json::to_string(&widget).unwrap();
        let decoded = decode::<Widget>(&content).unwrap();
        assert_eq!(decoded, widget);
    }

    #[test]
    fn decode_rejects_malformed_content() {
        let err = decode::<Widget>("not json").unwrap_err();
        assert!(matches!(err, CoreError::BadPayload { .. }));
    }

    #[tokio::test]
    async fn in_memory_store_used_in_fan_out_tests_starts_empty() {
        let store: Arc<dyn PrimaryStoreAdapter<Widget>> = Arc::new(InMemoryStore::new("primary"));
        assert!(store.find_by_id(&1).await.unwrap().is_none());
    }

    /// Spec §8 scenario 5 ("Id typing"): an entity keyed by UUID parses its
    /// textual id back out of a `DELETE` intent's `content` field.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Session {
        id: uuid::Uuid,
        user: String,
    }

    impl Entity for Session {
        type Id = uuid::Uuid;
        fn id(&self) -> uuid::Uuid {
            self.id
        }
        fn type_name() -> &'static str {
            "session"
        }
        fn policy() -> CachingPolicy {
            CachingPolicy::new(&[Pattern::WriteBehind], CF::Json)
        }
    }

    #[test]
    fn parse_id_accepts_uuid_ids() {
        let raw = "550e8400-e29b-41d4-a716-446655440000";
        let id = parse_id::<Session>(raw).expect("UUID should parse");
        assert_eq!(id.to_string(), raw);
    }
}
