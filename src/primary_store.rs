//! Primary Store Adapter (spec §4.8).
//!
//! Store driver internals are out of scope (spec §1 Non-goals); only the
//! contract and one in-memory adapter — useful for tests and the demos
//! under `demos/` — are implemented here. A real SQL/document-store
//! adapter just implements [`PrimaryStoreAdapter`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::entity::Entity;
use crate::error::CoreError;

/// A per-entity CRUD facade over the store of record (spec §4.8).
///
/// Implementations must make `save` an upsert-by-id and `delete_by_id` a
/// delete-if-exists: the stream delivering intents is at-least-once, so
/// duplicate applies must converge to the same state (spec §4.4
/// "Idempotence requirement").
#[async_trait]
pub trait PrimaryStoreAdapter<E: Entity>: Send + Sync {
    async fn find_by_id(&self, id: &E::Id) -> Result<Option<E>, CoreError>;
    async fn save(&self, entity: &E) -> Result<E, CoreError>;
    async fn delete_by_id(&self, id: &E::Id) -> Result<(), CoreError>;
    async fn health_check(&self) -> bool;

    /// A name used only for diagnostics (error messages, logs); distinct
    /// store adapters registered for the same `E` should return distinct
    /// names so Processor fan-out errors are attributable.
    fn name(&self) -> &'static str {
        "primary-store"
    }
}

/// In-memory store of record, keyed by `E::Id` rendered as a string.
///
/// Useful as a demo/test double; not a Non-goal violation since it names no
/// real store driver.
pub struct InMemoryStore<E: Entity> {
    name: &'static str,
    rows: Arc<DashMap<String, E>>,
}

impl<E: Entity> InMemoryStore<E> {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            rows: Arc::new(DashMap::new()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Snapshot for assertions in tests.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, E> {
        self.rows
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[async_trait]
impl<E: Entity> PrimaryStoreAdapter<E> for InMemoryStore<E> {
    async fn find_by_id(&self, id: &E::Id) -> Result<Option<E>, CoreError> {
        Ok(self.rows.get(&id.to_string()).map(|r| r.clone()))
    }

    async fn save(&self, entity: &E) -> Result<E, CoreError> {
        let key = entity.id().to_string();
        self.rows.insert(key.clone(), entity.clone());
        debug!(store = %self.name, key = %key, "primary store upsert");
        Ok(entity.clone())
    }

    async fn delete_by_id(&self, id: &E::Id) -> Result<(), CoreError> {
        let key = id.to_string();
        self.rows.remove(&key);
        debug!(store = %self.name, key = %key, "primary store delete");
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
