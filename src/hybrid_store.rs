//! The façade that owns both stores, the current-basis selector, and the
//! swap invariant (spec.md §4.3).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::broadcaster::Broadcaster;
use crate::error::{CoreError, Result};
use crate::memory_store::MemoryStore;
use crate::model::{events_to_collections, DataAvailability, DataKind, Event, FlagChangeEvent, ItemDescriptor, KeyedItem, Selector};
use crate::persistent_store::{PersistentStoreAdapter, PersistentStoreConfig, PersistentStoreMode};
use crate::traits::{DataDestination, ReadOnlyStore};

struct Meta {
    selector: Selector,
    persist: bool,
}

/// Unifies `MemoryStore` and an optional `PersistentStoreAdapter` under
/// a single read interface, enforcing the one-way swap and the mirror
/// invariants.
pub struct HybridStore {
    memory: MemoryStore,
    persistent: RwLock<Option<PersistentStoreAdapter>>,
    /// `false` until the first successful `SetBasis`; `true` forever
    /// after (invariant 1, spec.md §3). Modeled as an atomic rather than
    /// behind the struct's `meta` lock, per the design note in spec.md
    /// §9, so the `Get` fast path never takes more than one lock.
    swapped_to_memory: AtomicBool,
    meta: RwLock<Meta>,
    used: AtomicBool,
    pub flag_changes: Broadcaster<FlagChangeEvent>,
}

impl Default for HybridStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HybridStore {
    pub fn new() -> Self {
        Self {
            memory: MemoryStore::new(),
            persistent: RwLock::new(None),
            swapped_to_memory: AtomicBool::new(false),
            meta: RwLock::new(Meta { selector: Selector::none(), persist: false }),
            used: AtomicBool::new(false),
            flag_changes: Broadcaster::new("flag-changes"),
        }
    }

    /// One-time configuration of the persistent-store collaborator.
    /// Errors if called after any read or write has already occurred.
    pub fn with_persistence(&self, config: PersistentStoreConfig) -> Result<()> {
        if self.used.load(Ordering::Acquire) {
            return Err(CoreError::LockError(
                "with_persistence called after HybridStore was already read or written".into(),
            ));
        }
        let adapter = PersistentStoreAdapter::from_config(config);
        let mut guard = self.persistent.write()?;
        *guard = adapter;
        Ok(())
    }

    fn mark_used(&self) {
        self.used.store(true, Ordering::Release);
    }

    fn active_is_memory(&self) -> bool {
        self.swapped_to_memory.load(Ordering::Acquire)
    }

    /// Pure function: mirroring happens only when a read-write
    /// persistent store is configured and the latched `persist` flag is
    /// set (spec.md §4.3 invariant 3).
    fn mirroring(persistent: &Option<PersistentStoreAdapter>, persist: bool) -> bool {
        persistent.as_ref().map(|p| p.mode() == PersistentStoreMode::ReadWrite).unwrap_or(false) && persist
    }

    /// Translate events → collections, replace MemoryStore contents,
    /// record selector/persist, swap `active` to memory permanently,
    /// then (if mirroring) mirror to the persistent store.
    pub async fn set_basis(&self, events: Vec<Event>, selector: Selector, persist: bool) -> Result<()> {
        self.mark_used();
        let collections = events_to_collections(&events);

        // MemoryStore update happens-before the persistent-store write
        // on this transition (invariant 5, "TXNS-PS").
        let changed = self.memory.set_basis(collections.clone())?;

        {
            let mut meta = self.meta.write()?;
            meta.selector = selector;
            meta.persist = persist;
        }
        // Permanent, one-way swap (invariant 1): once set, never cleared.
        self.swapped_to_memory.store(true, Ordering::Release);
        info!(changed = changed.len(), "basis applied, active store swapped to memory");

        self.broadcast_flag_changes(&changed);

        let mirroring = {
            let guard = self.persistent.read()?;
            Self::mirroring(&guard, persist)
        };
        if mirroring {
            let guard = self.persistent.read()?;
            if let Some(adapter) = guard.as_ref() {
                if let Err(err) = adapter.init(collections).await {
                    warn!(error = %err, "persistent store mirror on set_basis failed");
                    // MemoryStore state is retained regardless; the
                    // error is surfaced so the data source may retry on
                    // a later Commit.
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Apply each event to MemoryStore in arrival order; if mirroring,
    /// best-effort mirror the same upserts to the persistent store.
    pub async fn apply_delta(&self, events: Vec<Event>, selector: Selector, persist: bool) -> Result<()> {
        self.mark_used();

        let items: Vec<(DataKind, String, ItemDescriptor)> = events
            .iter()
            .filter_map(|event| match event {
                Event::Put { kind, key, data, version } => {
                    Some((*kind, key.clone(), ItemDescriptor::present(*version, data.clone())))
                }
                Event::Delete { kind, key, version } => {
                    Some((*kind, key.clone(), ItemDescriptor::tombstone(*version)))
                }
                Event::ServerIntent { .. } | Event::PayloadTransferred => None,
            })
            .collect();

        let applied = self.memory.upsert_batch(items.clone())?;

        {
            let mut meta = self.meta.write()?;
            meta.selector = selector;
            meta.persist = persist;
        }
        debug!(applied = applied.len(), "delta applied to memory store");

        self.broadcast_flag_changes(&applied);

        let mirroring = {
            let guard = self.persistent.read()?;
            Self::mirroring(&guard, persist)
        };
        if mirroring {
            let guard = self.persistent.read()?;
            if let Some(adapter) = guard.as_ref() {
                for (kind, key, descriptor) in items {
                    if let Err(err) = adapter.upsert(kind, &key, descriptor).await {
                        // Best-effort: per-item mirror errors are logged,
                        // not propagated. MemoryStore already holds the
                        // authoritative value; the outage watcher will
                        // repair the persistent store via Commit.
                        warn!(error = %err, key = %key, "persistent store mirror upsert failed");
                    }
                }
            }
        }
        Ok(())
    }

    fn broadcast_flag_changes(&self, changed: &[(DataKind, String)]) {
        for (kind, key) in changed {
            if *kind == DataKind::Features {
                self.flag_changes.broadcast(FlagChangeEvent { key: key.clone() });
            }
        }
    }

    /// Full mirror of MemoryStore's current contents to the persistent
    /// store. A no-op unless mirroring is enabled and the current
    /// availability is `Refreshed` (invariant 4, spec.md §3). Used to
    /// repopulate after an outage.
    pub async fn commit(&self) -> Result<()> {
        self.mark_used();
        let persist = self.meta.read()?.persist;
        let mirroring = {
            let guard = self.persistent.read()?;
            Self::mirroring(&guard, persist)
        };
        if !mirroring || !self.active_is_memory() {
            return Ok(());
        }

        let snapshot = self.memory.get_all_kinds()?;
        let guard = self.persistent.read()?;
        if let Some(adapter) = guard.as_ref() {
            adapter.init(snapshot).await?;
        }
        Ok(())
    }

    pub fn selector(&self) -> Result<Selector> {
        Ok(self.meta.read()?.selector.clone())
    }

    /// The configured persistent store's mode, if any. Used by the
    /// coordinator to decide once, at start-up, whether mirroring is
    /// structurally possible (and thus whether to spawn the outage
    /// recovery watcher) — independent of the per-basis `persist` latch.
    pub fn persistent_mode(&self) -> Result<Option<PersistentStoreMode>> {
        Ok(self.persistent.read()?.as_ref().map(|adapter| adapter.mode()))
    }

    /// The persistent store's status provider, if one is configured.
    pub fn persistent_status_provider(&self) -> Result<Option<std::sync::Arc<dyn crate::traits::DataStoreStatusProvider>>> {
        Ok(self.persistent.read()?.as_ref().map(|adapter| adapter.status_provider()))
    }

    /// `Refreshed` once any basis has swapped `active` to memory
    /// (invariant 1 makes this unconditional — see SPEC_FULL.md §9
    /// decision 2). Pre-swap, availability reflects only whether a
    /// configured persistent store already claims initialization.
    pub async fn data_availability(&self) -> Result<DataAvailability> {
        if self.active_is_memory() {
            return Ok(DataAvailability::Refreshed);
        }
        let has_cached_data = {
            let guard = self.persistent.read()?;
            match guard.as_ref() {
                Some(adapter) => adapter.is_initialized().await?,
                None => false,
            }
        };
        Ok(if has_cached_data { DataAvailability::Cached } else { DataAvailability::Defaults })
    }

    pub async fn close(&self) -> Result<()> {
        let guard = self.persistent.read()?;
        if let Some(adapter) = guard.as_ref() {
            adapter.close().await?;
        }
        self.flag_changes.close();
        Ok(())
    }
}

#[async_trait]
impl ReadOnlyStore for HybridStore {
    /// Fast path: when `active` is memory (the overwhelmingly common
    /// steady state), this takes only `MemoryStore`'s read lock and a
    /// single indirection, with no await point.
    async fn get(&self, kind: DataKind, key: &str) -> Result<Option<ItemDescriptor>> {
        self.mark_used();
        if self.active_is_memory() {
            return self.memory.get(kind, key);
        }
        let guard = self.persistent.read()?;
        match guard.as_ref() {
            Some(adapter) => adapter.get(kind, key).await.map_err(|err| {
                warn!(error = %err, "persistent store read failed");
                err
            }),
            None => self.memory.get(kind, key),
        }
    }

    async fn get_all(&self, kind: DataKind) -> Result<Vec<KeyedItem>> {
        self.mark_used();
        if self.active_is_memory() {
            return self.memory.get_all(kind);
        }
        let guard = self.persistent.read()?;
        match guard.as_ref() {
            Some(adapter) => adapter.get_all(kind).await,
            None => self.memory.get_all(kind),
        }
    }

    /// Delegates to `active` (spec.md §4.3): pre-swap, `active` is the
    /// persistent store, so a daemon-mode adapter that already claims
    /// initialization must be consulted rather than hard-coding `false`.
    async fn is_initialized(&self) -> Result<bool> {
        self.mark_used();
        if self.active_is_memory() {
            return self.memory.is_initialized();
        }
        let guard = self.persistent.read()?;
        match guard.as_ref() {
            Some(adapter) => adapter.is_initialized().await,
            None => Ok(false),
        }
    }
}

#[async_trait]
impl DataDestination for HybridStore {
    async fn set_basis(&self, events: Vec<Event>, selector: Selector, persist: bool) -> Result<()> {
        HybridStore::set_basis(self, events, selector, persist).await
    }

    async fn apply_delta(&self, events: Vec<Event>, selector: Selector, persist: bool) -> Result<()> {
        HybridStore::apply_delta(self, events, selector, persist).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataKind, Event, ItemData};

    fn put(kind: DataKind, key: &str, version: i64, byte: u8) -> Event {
        Event::Put { kind, key: key.into(), data: ItemData(vec![byte]), version }
    }

    #[tokio::test]
    async fn new_store_has_defaults_availability() {
        let store = HybridStore::new();
        assert_eq!(store.data_availability().await.unwrap(), DataAvailability::Defaults);
        assert!(!store.is_initialized().await.unwrap());
        assert_eq!(store.get(DataKind::Features, "foo").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_basis_swaps_to_memory_and_is_refreshed() {
        let store = HybridStore::new();
        store
            .set_basis(vec![put(DataKind::Features, "foo", 1, 1)], Selector::none(), false)
            .await
            .unwrap();
        assert_eq!(store.data_availability().await.unwrap(), DataAvailability::Refreshed);
        assert!(store.is_initialized().await.unwrap());
        assert_eq!(store.get(DataKind::Features, "foo").await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn empty_basis_still_swaps_and_is_refreshed_regardless_of_selector() {
        let store = HybridStore::new();
        store.set_basis(vec![], Selector::none(), false).await.unwrap();
        assert!(store.is_initialized().await.unwrap());
        assert_eq!(store.data_availability().await.unwrap(), DataAvailability::Refreshed);
    }

    #[tokio::test]
    async fn with_persistence_after_use_is_rejected() {
        let store = HybridStore::new();
        store.get(DataKind::Features, "foo").await.unwrap();
        let err = store.with_persistence(PersistentStoreConfig::None);
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn apply_delta_broadcasts_flag_changes_only_for_features() {
        let store = HybridStore::new();
        store.set_basis(vec![], Selector::none(), false).await.unwrap();
        let mut listener = store.flag_changes.add_listener();

        store
            .apply_delta(
                vec![
                    put(DataKind::Features, "flag1", 1, 1),
                    put(DataKind::Segments, "seg1", 1, 1),
                ],
                Selector::none(),
                false,
            )
            .await
            .unwrap();

        let event = listener.recv().await.unwrap();
        assert_eq!(event.key, "flag1");
    }

    struct DaemonStore {
        initialized: bool,
    }

    #[async_trait]
    impl crate::traits::PersistentStore for DaemonStore {
        async fn init(&self, _collections: Vec<crate::model::Collection>) -> Result<()> {
            Ok(())
        }

        async fn upsert(&self, _kind: DataKind, _key: &str, _descriptor: ItemDescriptor) -> Result<bool> {
            Ok(false)
        }

        async fn get(&self, kind: DataKind, key: &str) -> Result<Option<ItemDescriptor>> {
            if self.initialized && kind == DataKind::Features && key == "foo" {
                Ok(Some(ItemDescriptor::present(2, ItemData(vec![9]))))
            } else {
                Ok(None)
            }
        }

        async fn get_all(&self, _kind: DataKind) -> Result<Vec<KeyedItem>> {
            Ok(Vec::new())
        }

        async fn is_initialized(&self) -> Result<bool> {
            Ok(self.initialized)
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    struct NoopStatusProvider;
    impl crate::traits::DataStoreStatusProvider for NoopStatusProvider {
        fn is_status_monitoring_enabled(&self) -> bool {
            false
        }
        fn add_status_listener(&self) -> crate::broadcaster::Listener<crate::model::DataStoreStatus> {
            panic!("not used in this test")
        }
        fn remove_status_listener(&self, _id: crate::broadcaster::ListenerId) {}
    }

    #[tokio::test]
    async fn daemon_mode_is_initialized_delegates_to_persistent_store_pre_swap() {
        let store = HybridStore::new();
        store
            .with_persistence(PersistentStoreConfig::ReadOnly(
                std::sync::Arc::new(DaemonStore { initialized: true }),
                std::sync::Arc::new(NoopStatusProvider),
            ))
            .unwrap();

        assert!(store.is_initialized().await.unwrap());
        assert_eq!(store.data_availability().await.unwrap(), DataAvailability::Cached);
        assert_eq!(store.get(DataKind::Features, "foo").await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn daemon_mode_is_initialized_reflects_an_empty_persistent_store() {
        let store = HybridStore::new();
        store
            .with_persistence(PersistentStoreConfig::ReadOnly(
                std::sync::Arc::new(DaemonStore { initialized: false }),
                std::sync::Arc::new(NoopStatusProvider),
            ))
            .unwrap();

        assert!(!store.is_initialized().await.unwrap());
        assert_eq!(store.data_availability().await.unwrap(), DataAvailability::Defaults);
    }
}
