//! Cache-Aside, Write-Behind and Refresh-Ahead caching patterns on top of
//! a Redis-compatible store, with a durable stream-backed write-behind
//! pipeline: consumer groups, pending-entry retry with a dead-letter
//! queue, and keyspace-expiration-driven refresh.
//!
//! Start with [`CoreSystem::connect`], then register each cacheable type
//! via [`CoreBuilder`]:
//!
//! ```no_run
//! # use redis_cache_patterns::*;
//! # use std::sync::Arc;
//! # use serde::{Serialize, Deserialize};
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Employer { id: u64, name: String }
//!
//! impl Entity for Employer {
//!     type Id = u64;
//!     fn id(&self) -> u64 { self.id }
//!     fn type_name() -> &'static str { "employer" }
//!     fn policy() -> CachingPolicy {
//!         CachingPolicy::new(&[Pattern::CacheAside, Pattern::WriteBehind], CacheFormat::Json)
//!     }
//! }
//!
//! struct EmployerRepository;
//! impl Repository for EmployerRepository {
//!     fn type_name() -> &'static str { "employerrepository" }
//! }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let system = CoreSystem::connect().await?;
//! let primary: Arc<dyn PrimaryStoreAdapter<Employer>> =
//!     Arc::new(InMemoryStore::new("employer-sql"));
//! let handles = system
//!     .builder()
//!     .register_write_behind::<Employer, EmployerRepository>(vec![primary]);
//!
//! handles.facade.save(&Employer { id: 1, name: "Acme".into() }).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache_store;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod entity;
pub mod envelope;
pub mod error;
pub mod expiration_listener;
pub mod facade;
pub mod policy;
pub mod primary_store;
pub mod processor;
pub mod producer;
pub mod reaper;
pub mod registry;

pub use async_trait::async_trait;

pub use cache_store::{CacheStoreAdapter, RedisCacheStore};
pub use codec::{EntityCodec, HashCodec, JsonCodec};
pub use config::CoreConfig;
pub use consumer::{ConsumerHandle, StreamConsumer};
pub use entity::{CacheFormat, CachingPolicy, Entity, Pattern, PatternSet, Repository};
pub use envelope::{names, DlqRecord, Intent, Operation};
pub use error::{CoreError, CoreResult};
pub use expiration_listener::{ExpirationListener, ListenerHandle};
pub use facade::Facade;
pub use policy::PolicyRegistry;
pub use primary_store::{InMemoryStore, PrimaryStoreAdapter};
pub use processor::Processor;
pub use producer::StreamProducer;
pub use reaper::{PendingReaper, ReaperHandle};
pub use registry::{CoreBuilder, WriteBehindHandles};

use std::sync::Arc;

/// Top-level entry point: one shared Redis connection, used to register
/// every `(E, R)` pairing via [`CoreBuilder`] (spec §9 "Global state": the
/// policy registry is process-wide, and keyspace-notification
/// configuration is a one-time server-side step, so both are reached
/// through a single shared system rather than per-entity setup).
#[derive(Clone)]
pub struct CoreSystem {
    builder: Arc<CoreBuilder>,
}

impl CoreSystem {
    /// Connect using `REDIS_URL` (falls back to `redis://127.0.0.1:6379`)
    /// and the rest of [`CoreConfig::from_env`], mirroring the teacher's
    /// `CacheSystem::new`.
    pub async fn connect() -> anyhow::Result<Self> {
        Self::with_redis_url(&CoreConfig::redis_url()).await
    }

    /// Connect to an explicit Redis URL, the way the teacher's
    /// `CacheSystem::with_redis_url` does.
    pub async fn with_redis_url(redis_url: &str) -> anyhow::Result<Self> {
        let builder = CoreBuilder::connect(redis_url, CoreConfig::from_env()).await?;
        Ok(Self {
            builder: Arc::new(builder),
        })
    }

    #[must_use]
    pub fn builder(&self) -> &CoreBuilder {
        &self.builder
    }

    /// Ping the shared connection (spec SPEC_FULL §10.5 "Health check
    /// surface").
    pub async fn health_check(&self) -> bool {
        self.builder.health_check().await
    }
}
