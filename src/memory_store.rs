//! Versioned, key-indexed, kind-partitioned in-memory map of model
//! objects (spec.md §4.1). A single readers-writer lock guards the whole
//! structure; the lock is never held across a call into an external
//! collaborator.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use crate::error::Result;
use crate::model::{Collection, DataKind, ItemDescriptor, KeyedItem};

#[derive(Default)]
struct State {
    kinds: HashMap<DataKind, HashMap<String, ItemDescriptor>>,
    initialized: bool,
}

/// Correct, concurrent, versioned storage for all kinds.
pub struct MemoryStore {
    state: RwLock<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { state: RwLock::new(State::default()) }
    }

    /// Atomically replaces contents with `collections`. Prior data is
    /// discarded. Returns the set of `(kind, key)` pairs whose version
    /// actually advanced relative to the old contents, for the caller
    /// to turn into flag-change events — computing this here avoids a
    /// second full traversal under a fresh lock acquisition.
    pub fn set_basis(&self, collections: Vec<Collection>) -> Result<Vec<(DataKind, String)>> {
        let mut new_kinds: HashMap<DataKind, HashMap<String, ItemDescriptor>> = HashMap::new();
        for collection in collections {
            let mut map = HashMap::with_capacity(collection.items.len());
            for item in collection.items {
                map.insert(item.key, item.descriptor);
            }
            new_kinds.insert(collection.kind, map);
        }

        let mut state = self.state.write()?;
        let mut changed = Vec::new();
        for (kind, new_map) in &new_kinds {
            let old_map = state.kinds.get(kind);
            for (key, descriptor) in new_map {
                let advanced = old_map
                    .and_then(|m| m.get(key))
                    .map(|old| descriptor.version > old.version)
                    .unwrap_or(true);
                if advanced {
                    changed.push((*kind, key.clone()));
                }
            }
        }

        state.kinds = new_kinds;
        state.initialized = true;
        debug!(changed = changed.len(), "memory store basis applied");
        Ok(changed)
    }

    /// Inserts if absent or if `descriptor.version > current.version`;
    /// otherwise a no-op. Returns whether the write was applied.
    pub fn upsert(&self, kind: DataKind, key: &str, descriptor: ItemDescriptor) -> Result<bool> {
        let mut state = self.state.write()?;
        let applied = Self::upsert_locked(&mut state, kind, key, descriptor);
        state.initialized = true;
        Ok(applied)
    }

    /// Applies a batch of upserts under a single write-lock acquisition,
    /// preserving per-item monotonicity semantics. Returns the keys that
    /// were actually applied, in input order.
    pub fn upsert_batch(
        &self,
        items: Vec<(DataKind, String, ItemDescriptor)>,
    ) -> Result<Vec<(DataKind, String)>> {
        let mut state = self.state.write()?;
        let mut applied_keys = Vec::new();
        for (kind, key, descriptor) in items {
            if Self::upsert_locked(&mut state, kind, &key, descriptor) {
                applied_keys.push((kind, key));
            }
        }
        state.initialized = true;
        Ok(applied_keys)
    }

    fn upsert_locked(state: &mut State, kind: DataKind, key: &str, descriptor: ItemDescriptor) -> bool {
        let map = state.kinds.entry(kind).or_default();
        match map.get(key) {
            Some(current) if descriptor.version <= current.version => false,
            _ => {
                map.insert(key.to_string(), descriptor);
                true
            }
        }
    }

    /// Returns the stored descriptor, or `None` if the key has never
    /// been seen (distinct from a tombstone, which is `Some` with
    /// `item: Item::Tombstone`).
    pub fn get(&self, kind: DataKind, key: &str) -> Result<Option<ItemDescriptor>> {
        let state = self.state.read()?;
        Ok(state.kinds.get(&kind).and_then(|m| m.get(key)).cloned())
    }

    /// Snapshot copy of every item of `kind`, tombstones included.
    /// Ordering is unspecified.
    pub fn get_all(&self, kind: DataKind) -> Result<Vec<KeyedItem>> {
        let state = self.state.read()?;
        Ok(state
            .kinds
            .get(&kind)
            .map(|m| {
                m.iter()
                    .map(|(key, descriptor)| KeyedItem { key: key.clone(), descriptor: descriptor.clone() })
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Complete snapshot for mirroring, stable across concurrent
    /// writers via the internal lock.
    pub fn get_all_kinds(&self) -> Result<Vec<Collection>> {
        let state = self.state.read()?;
        Ok(state
            .kinds
            .iter()
            .map(|(kind, items)| Collection {
                kind: *kind,
                items: items
                    .iter()
                    .map(|(key, descriptor)| KeyedItem { key: key.clone(), descriptor: descriptor.clone() })
                    .collect(),
            })
            .collect())
    }

    /// True iff `set_basis` has been called at least once.
    pub fn is_initialized(&self) -> Result<bool> {
        Ok(self.state.read()?.initialized)
    }
}
