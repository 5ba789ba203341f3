//! Typed error kinds for the cache-pattern pipeline.
//!
//! Outer setup code (system bootstrap, builder wiring) keeps using
//! `anyhow::Result`, the way the teacher's `CacheSystem::new` and
//! `CacheSystemBuilder::build` do. Inside the pipeline, where callers need
//! to branch on *what* failed (retry vs. fatal vs. degrade-and-continue),
//! we use this typed enum instead.

use thiserror::Error;

/// Error kinds raised by the write-behind pipeline, the cache-aside read
/// path and the policy registry. See spec §7 for the recovery policy
/// attached to each kind.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Encoding an entity to its wire envelope, or decoding an envelope
    /// back into an entity, failed. Fatal for the entry that produced it.
    #[error("bad payload for entity '{entity}': {source}")]
    BadPayload {
        entity: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A store adapter (cache or primary) could not complete an operation.
    /// Recoverable: the entry stays pending and is retried by the reaper.
    #[error("store '{store}' unavailable: {source}")]
    StoreUnavailable {
        store: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Applying a decoded intent to one or more bound stores failed.
    /// Aggregates every store failure observed for a single entry.
    #[error("failed to apply message to {failed}/{attempted} stores: {details}")]
    ProcessMessage {
        attempted: usize,
        failed: usize,
        details: String,
    },

    /// The stream group-acknowledge call itself failed after the entry
    /// was already applied to every bound store.
    #[error("failed to acknowledge stream entry '{stream_id}' on group '{group}': {source}")]
    AcknowledgeMessage {
        stream_id: String,
        group: String,
        #[source]
        source: anyhow::Error,
    },

    /// The cache store could not be reached. Cache-aside reads fall
    /// through to the primary store; cache writes become a logged no-op.
    #[error("cache store unavailable: {source}")]
    CacheUnavailable {
        #[source]
        source: anyhow::Error,
    },

    /// The policy registry was asked to resolve a type with an invalid or
    /// missing declaration. Fatal at startup.
    #[error("policy misconfigured for entity '{entity}': {reason}")]
    PolicyMisconfigured {
        entity: &'static str,
        reason: String,
    },

    /// An id could not be parsed into any of the recognized id types
    /// (string, UUID, integral) and has no single-argument constructor.
    #[error("cannot parse id '{raw}' for entity '{entity}'")]
    UnparseableId { entity: &'static str, raw: String },
}

pub type CoreResult<T> = Result<T, CoreError>;
