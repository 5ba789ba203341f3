//! Policy Registry (spec §4.1).
//!
//! The source this spec distills from derives the cache namespace and
//! pattern bits by runtime reflection, then memoizes the result. The "open
//! questions" note in Design Notes §9 allows swapping reflection for an
//! explicit trait and a registration step; [`crate::entity::Entity::policy`]
//! is that trait method. All that remains is the memoization.
//!
//! We get the "once per type" memoization the source gets from a reflective
//! cache map by exploiting monomorphization instead: a `static` local to a
//! generic function gets one instance per concrete `E`, so
//! `PolicyRegistry::resolve::<E>()` only evaluates `E::policy()` the first
//! time it's called for that type, exactly like a per-type cache entry
//! without needing `TypeId` or a lock.

use crate::entity::{CachingPolicy, Entity};
use std::sync::OnceLock;

/// Resolves and memoizes [`CachingPolicy`] values per entity type.
///
/// Zero-sized: there is nothing to construct, the memoization lives in the
/// per-type `static` inside [`PolicyRegistry::resolve`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyRegistry;

impl PolicyRegistry {
    /// Resolve the memoized policy for `E`, computing it on first call.
    ///
    /// O(1) after the first call per `E`, as required by spec §4.1.
    pub fn resolve<E: Entity>() -> &'static CachingPolicy {
        generic_cell::<E>()
    }

    /// `false` whenever the policy is disabled (spec §3 `enabled`),
    /// regardless of which patterns it declares.
    #[must_use]
    pub fn has_cache_aside<E: Entity>() -> bool {
        let policy = Self::resolve::<E>();
        policy.enabled && policy.patterns.has_cache_aside()
    }

    #[must_use]
    pub fn has_refresh_ahead<E: Entity>() -> bool {
        let policy = Self::resolve::<E>();
        policy.enabled && policy.patterns.has_refresh_ahead()
    }

    #[must_use]
    pub fn has_write_behind<E: Entity>() -> bool {
        let policy = Self::resolve::<E>();
        policy.enabled && policy.patterns.has_write_behind()
    }

    /// The cache namespace for `E`: the declared prefix, or lower-case
    /// type name if unspecified (spec §3 "Cache key").
    #[must_use]
    pub fn prefix<E: Entity>() -> &'static str {
        match Self::resolve::<E>().prefix.as_deref() {
            Some(p) => leak_once::<E>(p),
            None => E::type_name(),
        }
    }
}

fn generic_cell<E: Entity>() -> &'static CachingPolicy {
    struct Cell<E>(std::marker::PhantomData<E>);
    impl<E: Entity> Cell<E> {
        fn get() -> &'static CachingPolicy {
            static ONCE: OnceLock<CachingPolicy> = OnceLock::new();
            ONCE.get_or_init(E::policy)
        }
    }
    Cell::<E>::get()
}

/// Leak a prefix string once per entity type so `prefix()` can return
/// `&'static str` without re-allocating on every call.
fn leak_once<E: Entity>(value: &str) -> &'static str {
    struct Cell<E>(std::marker::PhantomData<E>);
    impl<E: Entity> Cell<E> {
        fn get(value: &str) -> &'static str {
            static ONCE: OnceLock<String> = OnceLock::new();
            ONCE.get_or_init(|| value.to_string())
        }
    }
    Cell::<E>::get(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{CacheFormat, Pattern};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Widget {
        id: u64,
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
            CachingPolicy::new(&[Pattern::CacheAside, Pattern::WriteBehind], CacheFormat::Json)
        }
    }

    #[test]
    fn resolves_and_memoizes() {
        assert!(PolicyRegistry::has_cache_aside::<Widget>());
        assert!(PolicyRegistry::has_write_behind::<Widget>());
        assert!(!PolicyRegistry::has_refresh_ahead::<Widget>());
        assert_eq!(PolicyRegistry::prefix::<Widget>(), "widget");

        let first = PolicyRegistry::resolve::<Widget>() as *const _;
        let second = PolicyRegistry::resolve::<Widget>() as *const _;
        assert_eq!(first, second, "resolve must return the same memoized instance");
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Mothballed {
        id: u64,
    }

    impl Entity for Mothballed {
        type Id = u64;
        fn id(&self) -> u64 {
            self.id
        }
        fn type_name() -> &'static str {
            "mothballed"
        }
        fn policy() -> CachingPolicy {
            CachingPolicy::new(
                &[Pattern::CacheAside, Pattern::WriteBehind, Pattern::RefreshAhead],
                CacheFormat::Json,
            )
            .disabled()
        }
    }

    #[test]
    fn disabled_policy_reports_no_patterns_regardless_of_what_it_declares() {
        assert!(!PolicyRegistry::has_cache_aside::<Mothballed>());
        assert!(!PolicyRegistry::has_write_behind::<Mothballed>());
        assert!(!PolicyRegistry::has_refresh_ahead::<Mothballed>());
    }
}
