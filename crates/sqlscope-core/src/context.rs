//! Immutable, typed ambient context.
//!
//! An [`AmbientContext`] maps resource keys to installed values. Installing a
//! value returns a new child context; the parent never changes, so a value
//! installed for a nested call is invisible to its siblings and to the caller
//! once the nested call returns.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A typed key into an [`AmbientContext`].
pub trait ResourceKey: 'static {
    type Value: Send + Sync + 'static;

    /// Name used in debug output.
    const NAME: &'static str;
}

#[derive(Clone)]
struct Entry {
    name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

#[derive(Clone, Default)]
pub struct AmbientContext {
    entries: Arc<HashMap<TypeId, Entry>>,
}

impl AmbientContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value installed for `K`, if any.
    pub fn get<K: ResourceKey>(&self) -> Option<&K::Value> {
        self.entries
            .get(&TypeId::of::<K>())
            .and_then(|entry| entry.value.downcast_ref::<K::Value>())
    }

    pub fn contains<K: ResourceKey>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<K>())
    }

    /// Child context with `value` installed for `K`, shadowing any previous value.
    pub fn with<K: ResourceKey>(&self, value: K::Value) -> Self {
        let mut entries = (*self.entries).clone();
        entries.insert(
            TypeId::of::<K>(),
            Entry {
                name: K::NAME,
                value: Arc::new(value),
            },
        );
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Child context with `K` removed.
    pub fn without<K: ResourceKey>(&self) -> Self {
        if !self.contains::<K>() {
            return self.clone();
        }
        let mut entries = (*self.entries).clone();
        entries.remove(&TypeId::of::<K>());
        Self {
            entries: Arc::new(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of the installed keys, sorted.
    pub fn keys(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.values().map(|entry| entry.name).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for AmbientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmbientContext")
            .field("keys", &self.keys())
            .finish()
    }
}
