//! The coordinator: orchestrates bootstrap initializers, the primary and
//! secondary synchronizers, readiness signaling, and outage recovery
//! (spec.md §4.4).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::broadcaster::Broadcaster;
use crate::error::Result;
use crate::hybrid_store::HybridStore;
use crate::model::{DataSourceError, DataSourceState, DataSourceStatus, DataStoreStatus};
use crate::persistent_store::{PersistentStoreConfig, PersistentStoreMode};
use crate::traits::{
    CancellationSignal, DataDestination, DataInitializer, DataSourceStatusSink, DataSynchronizer,
    ReadOnlyStore, SyncReadySignal,
};

/// A guarded single-shot signal: multiple producers may attempt
/// closure, only the first succeeds, the rest are no-ops (spec.md §9
/// design note).
struct ReadyLatch {
    tx: StdMutex<Option<oneshot::Sender<()>>>,
}

impl ReadyLatch {
    fn new(tx: oneshot::Sender<()>) -> Self {
        Self { tx: StdMutex::new(Some(tx)) }
    }

    fn close(&self) {
        if let Some(tx) = self.tx.lock().expect("ready latch lock poisoned").take() {
            let _ = tx.send(());
        }
    }
}

/// Sink the coordinator hands to synchronizers so they can report
/// connection-lifecycle transitions without depending on `DataSystem`.
struct StatusSink {
    broadcaster: Arc<Broadcaster<DataSourceStatus>>,
}

impl DataSourceStatusSink for StatusSink {
    fn report(&self, state: DataSourceState, error: Option<DataSourceError>) {
        let status = match error {
            Some(err) => DataSourceStatus::with_error(state, err),
            None => DataSourceStatus::new(state),
        };
        self.broadcaster.broadcast(status);
    }
}

/// Construction-time configuration, grouping every runtime knob into one
/// struct rather than a long constructor parameter list (SPEC_FULL.md
/// §2 ambient addition).
pub struct DataSystemConfig {
    pub initializers: Vec<Arc<dyn DataInitializer>>,
    pub primary_synchronizer: Option<Arc<dyn DataSynchronizer>>,
    pub secondary_synchronizer: Option<Arc<dyn DataSynchronizer>>,
    pub offline: bool,
    pub persistence: PersistentStoreConfig,
}

impl Default for DataSystemConfig {
    fn default() -> Self {
        Self {
            initializers: Vec::new(),
            primary_synchronizer: None,
            secondary_synchronizer: None,
            offline: false,
            persistence: PersistentStoreConfig::None,
        }
    }
}

/// Orchestrates initializers, synchronizers, readiness signaling, and
/// outage recovery over a single `HybridStore`.
pub struct DataSystem {
    hybrid: Arc<HybridStore>,
    initializers: Vec<Arc<dyn DataInitializer>>,
    primary_synchronizer: Option<Arc<dyn DataSynchronizer>>,
    secondary_synchronizer: Option<Arc<dyn DataSynchronizer>>,
    offline: bool,
    data_source_status: Arc<Broadcaster<DataSourceStatus>>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
    tasks: Arc<AsyncMutex<JoinSet<()>>>,
    /// Handle for the long-lived synchronizer-driver task, set by the
    /// coordinator once it spawns it. Kept separate from `tasks` so
    /// `stop()` can drain the coordinator/watcher JoinSet and retrieve
    /// this handle without either one waiting on a lock the other holds.
    sync_handle: Arc<AsyncMutex<Option<tokio::task::JoinHandle<()>>>>,
    stopped: AtomicBool,
}

impl DataSystem {
    /// Constructs a `HybridStore` and wires it as the data destination
    /// consumed by synchronizers.
    pub fn new(config: DataSystemConfig) -> Result<Self> {
        let hybrid = Arc::new(HybridStore::new());
        hybrid.with_persistence(config.persistence)?;

        let (cancel_tx, cancel_rx) = watch::channel(false);

        Ok(Self {
            hybrid,
            initializers: config.initializers,
            primary_synchronizer: config.primary_synchronizer,
            secondary_synchronizer: config.secondary_synchronizer,
            offline: config.offline,
            data_source_status: Arc::new(Broadcaster::new("data-source-status")),
            cancel_tx,
            cancel_rx,
            tasks: Arc::new(AsyncMutex::new(JoinSet::new())),
            sync_handle: Arc::new(AsyncMutex::new(None)),
            stopped: AtomicBool::new(false),
        })
    }

    fn cancellation_signal(&self) -> CancellationSignal {
        CancellationSignal::new(self.cancel_rx.clone())
    }

    /// If disabled, immediately closes `ready` and returns. Otherwise
    /// spawns the coordinator task and returns once it has been
    /// scheduled (not once it has finished — the caller awaits its own
    /// `ready` receiver for that).
    pub async fn start(&self, ready: oneshot::Sender<()>) {
        if self.offline {
            self.data_source_status.broadcast(DataSourceStatus::new(DataSourceState::Off));
            let _ = ready.send(());
            return;
        }

        self.data_source_status.broadcast(DataSourceStatus::new(DataSourceState::Initializing));

        let latch = Arc::new(ReadyLatch::new(ready));
        let hybrid = self.hybrid.clone();
        let initializers = self.initializers.clone();
        let primary = self.primary_synchronizer.clone();
        let cancel = self.cancellation_signal();
        let data_source_status = self.data_source_status.clone();
        let sync_handle = self.sync_handle.clone();

        let mut guard = self.tasks.lock().await;
        guard.spawn(Self::run_coordinator(
            hybrid,
            initializers,
            primary,
            latch,
            cancel,
            data_source_status,
            sync_handle,
        ));

        if matches!(self.hybrid.persistent_mode(), Ok(Some(PersistentStoreMode::ReadWrite))) {
            let hybrid = self.hybrid.clone();
            let cancel = self.cancellation_signal();
            guard.spawn(Self::run_outage_watcher(hybrid, cancel));
        }
    }

    async fn run_coordinator(
        hybrid: Arc<HybridStore>,
        initializers: Vec<Arc<dyn DataInitializer>>,
        primary: Option<Arc<dyn DataSynchronizer>>,
        latch: Arc<ReadyLatch>,
        mut cancel: CancellationSignal,
        data_source_status: Arc<Broadcaster<DataSourceStatus>>,
        sync_handle: Arc<AsyncMutex<Option<tokio::task::JoinHandle<()>>>>,
    ) {
        let mut initial_selector = crate::model::Selector::none();

        for initializer in &initializers {
            if cancel.is_cancelled() {
                info!("initializer loop observed cancellation");
                return;
            }

            let fetch = initializer.fetch(cancel.clone());
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("initializer loop cancelled mid-fetch");
                    return;
                }
                result = fetch => {
                    match result {
                        Err(err) => {
                            warn!(initializer = initializer.name(), error = %err, "initializer failed, trying next");
                            continue;
                        }
                        Ok(basis) => {
                            match hybrid.set_basis(basis.events, basis.selector.clone(), basis.persist).await {
                                Err(err) => {
                                    warn!(initializer = initializer.name(), error = %err, "initializer basis rejected, trying next");
                                    continue;
                                }
                                Ok(()) => {
                                    initial_selector = basis.selector;
                                    latch.close();
                                    data_source_status.broadcast(DataSourceStatus::new(DataSourceState::Valid));
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }

        let Some(primary) = primary else {
            latch.close();
            return;
        };

        let (sync_ready_tx, sync_ready_rx) = oneshot::channel();
        let ready_signal = SyncReadySignal::new(sync_ready_tx);
        let destination: Arc<dyn DataDestination> = hybrid.clone();
        let status_sink: Arc<dyn DataSourceStatusSink> = Arc::new(StatusSink { broadcaster: data_source_status });
        let sync_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            primary.sync(ready_signal, initial_selector, destination, status_sink, sync_cancel).await;
        });
        *sync_handle.lock().await = Some(handle);

        tokio::select! {
            _ = sync_ready_rx => {
                latch.close();
            }
            _ = cancel.cancelled() => {}
        }
    }

    async fn run_outage_watcher(hybrid: Arc<HybridStore>, mut cancel: CancellationSignal) {
        let Ok(Some(mut listener)) = hybrid.persistent_status_provider().map(|p| p.map(|p| p.add_status_listener())) else {
            return;
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return;
                }
                status = listener.recv() => {
                    match status {
                        Some(DataStoreStatus { available: true, needs_refresh: true }) => {
                            if let Err(err) = hybrid.commit().await {
                                error!(error = %err, "outage recovery commit failed");
                            }
                        }
                        Some(_) => {}
                        None => return,
                    }
                }
            }
        }
    }

    /// Cancels the root context, waits for every spawned task to drain,
    /// then closes the synchronizers and the `HybridStore`. Idempotent:
    /// a second call returns `Ok(())` without doing any work.
    pub async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let _ = self.cancel_tx.send(true);

        let mut tasks = self.tasks.lock().await;
        while tasks.join_next().await.is_some() {}
        drop(tasks);

        if let Some(handle) = self.sync_handle.lock().await.take() {
            let _ = handle.await;
        }

        if let Some(primary) = &self.primary_synchronizer {
            if let Err(err) = primary.close().await {
                warn!(error = %err, "primary synchronizer close failed");
            }
        }
        if let Some(secondary) = &self.secondary_synchronizer {
            if let Err(err) = secondary.close().await {
                warn!(error = %err, "secondary synchronizer close failed");
            }
        }

        self.data_source_status.broadcast(DataSourceStatus::new(DataSourceState::Off));
        self.data_source_status.close();
        self.hybrid.close().await?;
        Ok(())
    }

    /// A read-only view of the store for the evaluator.
    pub fn store(&self) -> Arc<dyn ReadOnlyStore> {
        self.hybrid.clone()
    }

    /// The write-side view of the store. Exposed for collaborators (and
    /// tests) that need to drive basis/delta application outside of a
    /// `DataSynchronizer`, such as a caller-owned bootstrap path.
    pub fn destination(&self) -> Arc<dyn DataDestination> {
        self.hybrid.clone()
    }

    pub async fn data_availability(&self) -> crate::model::DataAvailability {
        if self.offline {
            return crate::model::DataAvailability::Defaults;
        }
        self.hybrid.data_availability().await.unwrap_or(crate::model::DataAvailability::Defaults)
    }

    pub fn offline(&self) -> bool {
        self.offline
    }

    pub fn data_source_status_broadcaster(&self) -> Arc<Broadcaster<DataSourceStatus>> {
        self.data_source_status.clone()
    }

    pub fn data_store_status_provider(&self) -> Result<Option<Arc<dyn crate::traits::DataStoreStatusProvider>>> {
        self.hybrid.persistent_status_provider()
    }

    pub fn flag_change_broadcaster(&self) -> &Broadcaster<crate::model::FlagChangeEvent> {
        &self.hybrid.flag_changes
    }
}
