//! Entity trait and caching policy model (spec §3, §4.1).
//!
//! Design Notes §9 ("Runtime reflection on declarations") explicitly allows
//! replacing reflective namespace/id-type discovery with explicit per-entity
//! registration plus a trait that returns namespace and id type. This module
//! is that trait: every cacheable record implements [`Entity`], declaring its
//! id type and its policy once, in code, instead of via an annotation the
//! core would have to inspect at runtime.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::hash::Hash;
use std::str::FromStr;
use std::time::Duration;

/// Bit flags for the three caching patterns, unioned per entity (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    CacheAside,
    RefreshAhead,
    WriteBehind,
}

/// Memoized union of enabled patterns for one entity type.
///
/// A plain `u8` bitset rather than pulling in the `bitflags` crate for three
/// fixed, never-extended bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatternSet(u8);

impl PatternSet {
    const CACHE_ASIDE: u8 = 0b001;
    const REFRESH_AHEAD: u8 = 0b010;
    const WRITE_BEHIND: u8 = 0b100;

    #[must_use]
    pub fn new(patterns: &[Pattern]) -> Self {
        let mut bits = 0u8;
        for p in patterns {
            bits |= match p {
                Pattern::CacheAside => Self::CACHE_ASIDE,
                Pattern::RefreshAhead => Self::REFRESH_AHEAD,
                Pattern::WriteBehind => Self::WRITE_BEHIND,
            };
        }
        Self(bits)
    }

    #[must_use]
    pub fn has_cache_aside(self) -> bool {
        self.0 & Self::CACHE_ASIDE != 0
    }

    #[must_use]
    pub fn has_refresh_ahead(self) -> bool {
        self.0 & Self::REFRESH_AHEAD != 0
    }

    #[must_use]
    pub fn has_write_behind(self) -> bool {
        self.0 & Self::WRITE_BEHIND != 0
    }
}

/// Serialized content encoding for cached/streamed entities (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFormat {
    /// Entity body is a single JSON-encoded string.
    Json,
    /// Entity body is a flat field map, stored as a Redis hash.
    Hash,
}

/// Immutable per-entity caching policy (spec §3, materialized once).
#[derive(Debug, Clone)]
pub struct CachingPolicy {
    pub patterns: PatternSet,
    pub format: CacheFormat,
    pub enabled: bool,
    /// `None` means no expiration (spec: `ttl <= 0`).
    pub ttl: Option<Duration>,
    /// Cache namespace override; defaults to `E::type_name()` when `None`.
    pub prefix: Option<String>,
}

impl CachingPolicy {
    #[must_use]
    pub fn new(patterns: &[Pattern], format: CacheFormat) -> Self {
        Self {
            patterns: PatternSet::new(patterns),
            format,
            enabled: true,
            ttl: None,
            prefix: None,
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// An application record cacheable by this library.
///
/// `Id` takes the place of the reflective id-type inspection described in
/// spec §4.4: implementing `FromStr` is exactly the "single-argument string
/// constructor" fallback the spec calls for, and covers `String`, `Uuid`,
/// and the integral types directly since they all implement it already.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    type Id: Display + FromStr + Clone + Eq + Hash + Send + Sync + 'static;

    /// Stable identifier for this record.
    fn id(&self) -> Self::Id;

    /// Lower-case simple type name, used to derive stream names, the
    /// default cache prefix, and consumer/group names (spec §3).
    fn type_name() -> &'static str;

    /// Declarative policy for this entity type (spec §4.1, §6 "Entity
    /// declaration surface"). Called once and memoized by
    /// [`crate::policy::PolicyRegistry`].
    fn policy() -> CachingPolicy;
}

/// A named binding for a target primary store (spec §2 "bound to a target
/// store R", §4.8 "Multiple primary stores may be registered for one E").
///
/// `R` carries no data; it exists only so `StreamConsumer<E, R>`,
/// `Processor<E, R>` and `PendingReaper<E, R>` can derive a stable,
/// type-checked consumer-group name (spec §3 "Consumer group name") without
/// the caller passing strings around by hand.
pub trait Repository: Send + Sync + 'static {
    /// Lower-cased in [`crate::envelope::names::group`] and
    /// [`crate::envelope::names::consumer`]; keep it stable across
    /// deploys or the group name changes and in-flight offsets are lost.
    fn type_name() -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_set_unions_bits() {
        let set = PatternSet::new(&[Pattern::CacheAside, Pattern::WriteBehind]);
        assert!(set.has_cache_aside());
        assert!(set.has_write_behind());
        assert!(!set.has_refresh_ahead());
    }

    #[test]
    fn empty_pattern_set_has_nothing() {
        let set = PatternSet::new(&[]);
        assert!(!set.has_cache_aside());
        assert!(!set.has_refresh_ahead());
        assert!(!set.has_write_behind());
    }
}
