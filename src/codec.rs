//! Entity encoding per the declared cache format (spec §3 `F ∈ {JSON, HASH}`).
//!
//! The stream envelope is always a flat string→string map (spec §6): even a
//! `HASH`-formatted entity has to travel as a single `content` string on the
//! wire. This module resolves that by giving every format two views of the
//! same entity:
//!
//! - [`EntityCodec::to_content`] / [`EntityCodec::from_content`] — the
//!   `content` field used on the stream envelope, and the value a `JSON`
//!   cache key holds directly.
//! - [`EntityCodec::to_field_map`] / [`EntityCodec::from_field_map`] — the
//!   flattened field map a `HASH` cache key stores via `HSET`.
//!
//! For `HASH`, `to_content` JSON-encodes the flattened field map so it still
//! fits the stream's flat-string-map constraint; the cache store adapter
//! never calls `to_content` for `HASH` entities, only `to_field_map`
//! (see `cache_store.rs`).

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;

use crate::entity::Entity;

/// Encodes/decodes one entity type per its declared [`crate::entity::CacheFormat`].
pub trait EntityCodec<E: Entity> {
    fn to_content(&self, entity: &E) -> Result<String>;
    fn from_content(&self, content: &str) -> Result<E>;
    fn to_field_map(&self, entity: &E) -> Result<HashMap<String, String>>;
    fn from_field_map(&self, fields: &HashMap<String, String>) -> Result<E>;
}

/// `F = JSON`: the entity round-trips as a single JSON string.
#[derive(Debug, Default)]
pub struct JsonCodec;

impl<E: Entity> EntityCodec<E> for JsonCodec {
    fn to_content(&self, entity: &E) -> Result<String> {
        serde_json::to_string(entity).context("failed to encode entity as JSON")
    }

    fn from_content(&self, content: &str) -> Result<E> {
        serde_json::from_str(content).context("failed to decode entity from JSON")
    }

    fn to_field_map(&self, entity: &E) -> Result<HashMap<String, String>> {
        let mut map = HashMap::with_capacity(1);
        map.insert("content".to_string(), self.to_content(entity)?);
        Ok(map)
    }

    fn from_field_map(&self, fields: &HashMap<String, String>) -> Result<E> {
        let content = fields
            .get("content")
            .context("JSON-format hash entry missing 'content' field")?;
        self.from_content(content)
    }
}

/// `F = HASH`: the entity round-trips as a flat field map.
///
/// Each top-level JSON field is flattened to a string: scalars use their
/// natural text form, nested arrays/objects are re-encoded as JSON text so
/// the map stays flat.
#[derive(Debug, Default)]
pub struct HashCodec;

impl<E: Entity> EntityCodec<E> for HashCodec {
    fn to_content(&self, entity: &E) -> Result<String> {
        let fields = self.to_field_map(entity)?;
        serde_json::to_string(&fields).context("failed to encode hash field map")
    }

    fn from_content(&self, content: &str) -> Result<E> {
        let fields: HashMap<String, String> =
            serde_json::from_str(content).context("failed to decode hash field map")?;
        self.from_field_map(&fields)
    }

    fn to_field_map(&self, entity: &E) -> Result<HashMap<String, String>> {
        let value = serde_json::to_value(entity).context("failed to encode entity to JSON value")?;
        let object = value
            .as_object()
            .context("HASH format requires entity to serialize to a JSON object")?;

        let mut fields = HashMap::with_capacity(object.len());
        for (key, field_value) in object {
            fields.insert(key.clone(), scalar_to_string(field_value));
        }
        Ok(fields)
    }

    fn from_field_map(&self, fields: &HashMap<String, String>) -> Result<E> {
        let mut object = serde_json::Map::with_capacity(fields.len());
        for (key, raw) in fields {
            object.insert(key.clone(), string_to_value(raw));
        }
        serde_json::from_value(Value::Object(object))
            .context("failed to decode entity from hash field map")
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Best-effort inverse of [`scalar_to_string`]: try JSON first (covers
/// numbers, bools, nested structures re-flattened by `to_field_map`), fall
/// back to treating the raw text as a string.
fn string_to_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
