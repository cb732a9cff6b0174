//! Optional wrapper over an external key-value store, operating in
//! read-only (daemon) or read-write (mirror) mode (spec.md §4.2).

use std::sync::Arc;

use tracing::warn;

use crate::broadcaster::{Listener, ListenerId};
use crate::error::Result;
use crate::model::{Collection, DataKind, DataStoreStatus, ItemDescriptor, KeyedItem};
use crate::traits::{DataStoreStatusProvider, PersistentStore};

/// Whether a configured persistent store accepts writes. Modeled as a
/// tagged enum (spec.md §9 design note) rather than a nullable field
/// plus a boolean flag, so the mirroring decision in `HybridStore` is a
/// pure match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistentStoreMode {
    /// Daemon mode: some other process owns writes; this SDK instance
    /// only ever reads.
    ReadOnly,
    /// Mirror mode: this SDK instance writes through on basis/delta and
    /// on outage recovery.
    ReadWrite,
}

/// Configuration handed to `HybridStore::with_persistence`.
pub enum PersistentStoreConfig {
    None,
    ReadOnly(Arc<dyn PersistentStore>, Arc<dyn DataStoreStatusProvider>),
    ReadWrite(Arc<dyn PersistentStore>, Arc<dyn DataStoreStatusProvider>),
}

/// Provides an `{Init, Upsert, Get, GetAll, IsInitialized, Close}` facet
/// plus an availability monitor over an external store, tagged with its
/// read-only/read-write mode.
pub struct PersistentStoreAdapter {
    store: Arc<dyn PersistentStore>,
    status: Arc<dyn DataStoreStatusProvider>,
    mode: PersistentStoreMode,
}

impl PersistentStoreAdapter {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        status: Arc<dyn DataStoreStatusProvider>,
        mode: PersistentStoreMode,
    ) -> Self {
        Self { store, status, mode }
    }

    pub fn from_config(config: PersistentStoreConfig) -> Option<Self> {
        match config {
            PersistentStoreConfig::None => None,
            PersistentStoreConfig::ReadOnly(store, status) => {
                Some(Self::new(store, status, PersistentStoreMode::ReadOnly))
            }
            PersistentStoreConfig::ReadWrite(store, status) => {
                Some(Self::new(store, status, PersistentStoreMode::ReadWrite))
            }
        }
    }

    pub fn mode(&self) -> PersistentStoreMode {
        self.mode
    }

    /// True only in read-write (mirror) mode.
    pub fn writable(&self) -> bool {
        self.mode == PersistentStoreMode::ReadWrite
    }

    pub async fn init(&self, collections: Vec<Collection>) -> Result<()> {
        if !self.writable() {
            warn!("ignoring persistent-store init attempt on a read-only adapter");
            return Ok(());
        }
        self.store.init(collections).await
    }

    pub async fn upsert(&self, kind: DataKind, key: &str, descriptor: ItemDescriptor) -> Result<bool> {
        if !self.writable() {
            return Ok(false);
        }
        self.store.upsert(kind, key, descriptor).await
    }

    pub async fn get(&self, kind: DataKind, key: &str) -> Result<Option<ItemDescriptor>> {
        self.store.get(kind, key).await
    }

    pub async fn get_all(&self, kind: DataKind) -> Result<Vec<KeyedItem>> {
        self.store.get_all(kind).await
    }

    pub async fn is_initialized(&self) -> Result<bool> {
        self.store.is_initialized().await
    }

    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }

    pub fn is_status_monitoring_enabled(&self) -> bool {
        self.status.is_status_monitoring_enabled()
    }

    pub fn add_status_listener(&self) -> Listener<DataStoreStatus> {
        self.status.add_status_listener()
    }

    pub fn remove_status_listener(&self, id: ListenerId) {
        self.status.remove_status_listener(id)
    }

    pub fn status_provider(&self) -> Arc<dyn DataStoreStatusProvider> {
        self.status.clone()
    }
}
