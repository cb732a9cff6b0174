//! Interfaces the core consumes from collaborators, and the read
//! interface it exposes to callers (spec.md §6).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::broadcaster::{Listener, ListenerId};
use crate::error::Result;
use crate::model::{Basis, DataKind, DataSourceError, DataSourceState, DataStoreStatus, Event, ItemDescriptor, KeyedItem, Selector};

/// A cooperatively-checked cancellation signal threaded through the
/// coordinator, the outage watcher, and every initializer call. Cloning
/// is cheap; every clone observes the same cancellation.
#[derive(Clone)]
pub struct CancellationSignal {
    rx: tokio::sync::watch::Receiver<bool>,
}

impl CancellationSignal {
    pub(crate) fn new(rx: tokio::sync::watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves as soon as cancellation is signalled. If it is already
    /// signalled, resolves immediately.
    pub async fn cancelled(&mut self) {
        if self.is_cancelled() {
            return;
        }
        let _ = self.rx.changed().await;
    }
}

/// One-shot signal a synchronizer uses to tell the coordinator it has
/// delivered its first authoritative payload.
pub struct SyncReadySignal {
    tx: Option<oneshot::Sender<()>>,
}

impl SyncReadySignal {
    pub(crate) fn new(tx: oneshot::Sender<()>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Signals readiness. A no-op on every call after the first.
    pub fn signal(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// One-shot fetch of a bootstrap [`Basis`]. Initializers are consumed in
/// declared order until one succeeds.
#[async_trait]
pub trait DataInitializer: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, cancel: CancellationSignal) -> Result<Basis>;
}

/// Implemented by `HybridStore`, passed to synchronizers as the
/// destination for basis/delta callbacks.
#[async_trait]
pub trait DataDestination: Send + Sync {
    async fn set_basis(&self, events: Vec<Event>, selector: Selector, persist: bool) -> Result<()>;

    async fn apply_delta(&self, events: Vec<Event>, selector: Selector, persist: bool) -> Result<()>;
}

/// Lets a synchronizer push connection-lifecycle transitions to the
/// data-source status broadcaster without depending on the concrete
/// `DataSystem` type (SPEC_FULL.md §6).
pub trait DataSourceStatusSink: Send + Sync {
    fn report(&self, state: DataSourceState, error: Option<DataSourceError>);
}

/// Drives a long-lived subscription against an upstream (or p2p, or
/// file-watch) source, applying deltas to a [`DataDestination`] as they
/// arrive.
#[async_trait]
pub trait DataSynchronizer: Send + Sync {
    async fn sync(
        &self,
        ready: SyncReadySignal,
        initial_selector: Selector,
        destination: Arc<dyn DataDestination>,
        status_sink: Arc<dyn DataSourceStatusSink>,
        cancel: CancellationSignal,
    );

    async fn close(&self) -> Result<()>;

    fn is_initialized(&self) -> bool;
}

/// The external key-value store a [`crate::persistent_store::PersistentStoreAdapter`]
/// wraps.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn init(&self, collections: Vec<crate::model::Collection>) -> Result<()>;

    async fn upsert(&self, kind: DataKind, key: &str, descriptor: ItemDescriptor) -> Result<bool>;

    async fn get(&self, kind: DataKind, key: &str) -> Result<Option<ItemDescriptor>>;

    async fn get_all(&self, kind: DataKind) -> Result<Vec<KeyedItem>>;

    async fn is_initialized(&self) -> Result<bool>;

    async fn close(&self) -> Result<()>;
}

/// Exposes the persistent store's availability transitions so the
/// outage-recovery watcher (spec.md §4.4.1) can react to them.
pub trait DataStoreStatusProvider: Send + Sync {
    fn is_status_monitoring_enabled(&self) -> bool;

    fn add_status_listener(&self) -> Listener<DataStoreStatus>;

    fn remove_status_listener(&self, id: ListenerId);
}

/// The read-only facet exposed to the evaluator and other callers. Async
/// because a daemon-mode read may fall through to the persistent store;
/// once a basis has swapped `active` to the memory store (the common
/// case) these calls never actually suspend.
#[async_trait]
pub trait ReadOnlyStore: Send + Sync {
    async fn get(&self, kind: DataKind, key: &str) -> Result<Option<ItemDescriptor>>;

    async fn get_all(&self, kind: DataKind) -> Result<Vec<KeyedItem>>;

    async fn is_initialized(&self) -> Result<bool>;
}
