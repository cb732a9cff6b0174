//! Hand-rolled test doubles shared by the end-to-end scenarios, in the
//! style of the teacher's in-crate fakes rather than a mocking
//! framework.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex as AsyncMutex};

use ld_core_data::{
    Basis, Broadcaster, CancellationSignal, Collection, DataDestination, DataInitializer,
    DataKind, DataSourceStatusSink, DataStoreStatus, DataStoreStatusProvider, DataSynchronizer,
    Delta, Event, ItemDescriptor, KeyedItem, Listener, ListenerId, PersistentStore, Result,
    Selector, SyncReadySignal,
};

/// An initializer that blocks until cancelled (scenario 6) or returns a
/// fixed `Basis` (scenario 2).
pub struct ScriptedInitializer {
    pub basis: Option<Basis>,
}

#[async_trait]
impl DataInitializer for ScriptedInitializer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch(&self, mut cancel: CancellationSignal) -> Result<Basis> {
        match &self.basis {
            Some(basis) => Ok(basis.clone()),
            None => {
                cancel.cancelled().await;
                Err(ld_core_data::CoreError::ContextCancelled)
            }
        }
    }
}

/// Queues one `Basis` and an ordered list of `Delta`s, delivered to the
/// destination on its own schedule once `drive()` is called.
pub struct ScriptedSynchronizer {
    initial_basis: Option<Basis>,
    deltas: Mutex<Vec<Delta>>,
    drive_rx: AsyncMutex<Option<oneshot::Receiver<()>>>,
    pub drive_tx: Mutex<Option<oneshot::Sender<()>>>,
    deltas_rx: AsyncMutex<Option<oneshot::Receiver<()>>>,
    pub deltas_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl ScriptedSynchronizer {
    pub fn new(initial_basis: Basis, deltas: Vec<Delta>) -> Arc<Self> {
        let (tx, rx) = oneshot::channel();
        let (deltas_tx, deltas_rx) = oneshot::channel();
        Arc::new(Self {
            initial_basis: Some(initial_basis),
            deltas: Mutex::new(deltas),
            drive_rx: AsyncMutex::new(Some(rx)),
            drive_tx: Mutex::new(Some(tx)),
            deltas_rx: AsyncMutex::new(Some(deltas_rx)),
            deltas_tx: Mutex::new(Some(deltas_tx)),
        })
    }

    /// Releases the synchronizer to deliver its scripted basis.
    pub fn drive(&self) {
        if let Some(tx) = self.drive_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }

    /// Releases the synchronizer to apply its scripted deltas, once the
    /// basis has already been delivered.
    pub fn drive_deltas(&self) {
        if let Some(tx) = self.deltas_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }
}

#[async_trait]
impl DataSynchronizer for ScriptedSynchronizer {
    async fn sync(
        &self,
        mut ready: SyncReadySignal,
        _initial_selector: Selector,
        destination: Arc<dyn DataDestination>,
        _status_sink: Arc<dyn DataSourceStatusSink>,
        mut cancel: CancellationSignal,
    ) {
        let rx = self.drive_rx.lock().await.take();
        if let Some(rx) = rx {
            tokio::select! {
                _ = rx => {}
                _ = cancel.cancelled() => { return; }
            }
        }

        if let Some(basis) = self.initial_basis.clone() {
            let _ = destination.set_basis(basis.events, basis.selector, basis.persist).await;
            ready.signal();
        }

        let deltas_rx = self.deltas_rx.lock().await.take();
        if let Some(deltas_rx) = deltas_rx {
            tokio::select! {
                _ = deltas_rx => {}
                _ = cancel.cancelled() => { return; }
            }
        }

        for delta in self.deltas.lock().unwrap().drain(..).collect::<Vec<_>>() {
            let _ = destination.apply_delta(delta.events, delta.selector, delta.persist).await;
        }

        cancel.cancelled().await;
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        true
    }
}

/// An in-memory `PersistentStore` double that can be told to reject
/// writes (simulating an outage) and counts every call it receives.
#[derive(Default)]
pub struct FakePersistentStore {
    data: Mutex<HashMap<(DataKind, String), ItemDescriptor>>,
    pub unavailable: AtomicBool,
    pub init_calls: AtomicUsize,
    pub upsert_calls: AtomicUsize,
}

impl FakePersistentStore {
    pub fn prepopulated(kind: DataKind, key: &str, descriptor: ItemDescriptor) -> Arc<Self> {
        let store = Self::default();
        store.data.lock().unwrap().insert((kind, key.to_string()), descriptor);
        Arc::new(store)
    }

    pub fn snapshot(&self, kind: DataKind) -> Vec<KeyedItem> {
        self.data
            .lock()
            .unwrap()
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|((_, key), descriptor)| KeyedItem { key: key.clone(), descriptor: descriptor.clone() })
            .collect()
    }
}

#[async_trait]
impl PersistentStore for FakePersistentStore {
    async fn init(&self, collections: Vec<Collection>) -> Result<()> {
        self.init_calls.fetch_add(1, Ordering::Relaxed);
        if self.unavailable.load(Ordering::Acquire) {
            return Err(ld_core_data::CoreError::PersistentStoreWrite("unavailable".into()));
        }
        let mut data = self.data.lock().unwrap();
        data.clear();
        for collection in collections {
            for item in collection.items {
                data.insert((collection.kind, item.key), item.descriptor);
            }
        }
        Ok(())
    }

    async fn upsert(&self, kind: DataKind, key: &str, descriptor: ItemDescriptor) -> Result<bool> {
        self.upsert_calls.fetch_add(1, Ordering::Relaxed);
        if self.unavailable.load(Ordering::Acquire) {
            return Err(ld_core_data::CoreError::PersistentStoreWrite("unavailable".into()));
        }
        let mut data = self.data.lock().unwrap();
        match data.get(&(kind, key.to_string())) {
            Some(current) if descriptor.version <= current.version => Ok(false),
            _ => {
                data.insert((kind, key.to_string()), descriptor);
                Ok(true)
            }
        }
    }

    async fn get(&self, kind: DataKind, key: &str) -> Result<Option<ItemDescriptor>> {
        Ok(self.data.lock().unwrap().get(&(kind, key.to_string())).cloned())
    }

    async fn get_all(&self, kind: DataKind) -> Result<Vec<KeyedItem>> {
        Ok(self.snapshot(kind))
    }

    async fn is_initialized(&self) -> Result<bool> {
        Ok(!self.data.lock().unwrap().is_empty())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Lets a test push `DataStoreStatus` transitions (e.g. an outage ending
/// with `needs_refresh=true`) to whatever listener the coordinator's
/// outage watcher registered.
pub struct FakeStatusProvider {
    broadcaster: Broadcaster<DataStoreStatus>,
}

impl FakeStatusProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { broadcaster: Broadcaster::new("fake-data-store-status") })
    }

    pub fn push(&self, status: DataStoreStatus) {
        self.broadcaster.broadcast(status);
    }
}

impl DataStoreStatusProvider for FakeStatusProvider {
    fn is_status_monitoring_enabled(&self) -> bool {
        true
    }

    fn add_status_listener(&self) -> Listener<DataStoreStatus> {
        self.broadcaster.add_listener()
    }

    fn remove_status_listener(&self, id: ListenerId) {
        self.broadcaster.remove_listener(id)
    }
}

pub fn put(kind: DataKind, key: &str, version: i64, byte: u8) -> Event {
    Event::Put { kind, key: key.into(), data: ld_core_data::ItemData(vec![byte]), version }
}
