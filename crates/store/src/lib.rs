//! Beluga keyed in-RAM store.
//!
//! `Store<T>` is the authoritative keyed container the informer reconciles
//! deltas into. Keys are derived deterministically from the value by a
//! [`KeyFunc`]; the default [`namespace_key`] mirrors the familiar
//! `namespace/name` scheme. In the informer context the store has a single
//! writer (the reconciler); other readers must treat it as eventually
//! consistent relative to the delta stream.

#![forbid(unsafe_code)]

use std::sync::Arc;

use beluga_core::LiteObj;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Errors surfaced by store operations. A failure aborts reconciliation of
/// the current delta; retry policy belongs to the driving loop.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("key: {0}")]
    Key(String),
    #[error("internal: {0}")]
    Internal(String),
}

/// Deterministic key derivation from a value.
pub type KeyFunc<T> = Arc<dyn Fn(&T) -> Result<String, StoreError> + Send + Sync>;

/// Key a [`LiteObj`] by `namespace/name`, or bare `name` for cluster-scoped
/// objects. An empty name is a key error.
pub fn namespace_key(obj: &LiteObj) -> Result<String, StoreError> {
    if obj.name.is_empty() {
        return Err(StoreError::Key("object has no name".into()));
    }
    Ok(match obj.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, obj.name),
        _ => obj.name.clone(),
    })
}

/// Keyed container contract consumed by the informer.
///
/// At most one entry per key. All fallible operations abort on key
/// derivation failure without mutating the map.
pub trait Store<T>: Send + Sync {
    /// Look up the stored value under the same key as `obj`.
    fn get(&self, obj: &T) -> Result<Option<T>, StoreError>;
    fn get_by_key(&self, key: &str) -> Result<Option<T>, StoreError>;
    fn add(&self, obj: T) -> Result<(), StoreError>;
    fn update(&self, obj: T) -> Result<(), StoreError>;
    fn delete(&self, obj: &T) -> Result<(), StoreError>;
    fn list(&self) -> Vec<T>;
    fn keys(&self) -> Vec<String>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Default [`Store`] backed by an `FxHashMap` under a read-write lock.
pub struct MemoryStore<T> {
    key_fn: KeyFunc<T>,
    items: RwLock<FxHashMap<String, T>>,
}

impl<T> MemoryStore<T> {
    pub fn new(key_fn: KeyFunc<T>) -> Self {
        Self { key_fn, items: RwLock::new(FxHashMap::default()) }
    }

    fn key_of(&self, obj: &T) -> Result<String, StoreError> {
        (self.key_fn)(obj)
    }
}

impl<T: Clone + Send + Sync> Store<T> for MemoryStore<T> {
    fn get(&self, obj: &T) -> Result<Option<T>, StoreError> {
        let key = self.key_of(obj)?;
        Ok(self.items.read().get(&key).cloned())
    }

    fn get_by_key(&self, key: &str) -> Result<Option<T>, StoreError> {
        Ok(self.items.read().get(key).cloned())
    }

    fn add(&self, obj: T) -> Result<(), StoreError> {
        let key = self.key_of(&obj)?;
        self.items.write().insert(key, obj);
        Ok(())
    }

    fn update(&self, obj: T) -> Result<(), StoreError> {
        let key = self.key_of(&obj)?;
        self.items.write().insert(key, obj);
        Ok(())
    }

    fn delete(&self, obj: &T) -> Result<(), StoreError> {
        let key = self.key_of(obj)?;
        self.items.write().remove(&key);
        Ok(())
    }

    fn list(&self) -> Vec<T> {
        self.items.read().values().cloned().collect()
    }

    fn keys(&self) -> Vec<String> {
        self.items.read().keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.items.read().len()
    }
}
