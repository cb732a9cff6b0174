//! Core data system for a server-side feature-flag evaluation SDK.
//!
//! This crate holds only the data-plane primitives an embedding SDK
//! client wires together at construction time: a fixed-point in-memory
//! store, an optional adapter over an external persistent store, the
//! hybrid façade that unifies the two behind one read interface, the
//! coordinator that drives bootstrap initializers and long-lived
//! synchronizers, and the broadcasters that fan status and change
//! events out to in-process listeners.
//!
//! Flag evaluation, HTTP transport, a logging backend, and CLI/packaging
//! concerns are external collaborators; this crate only defines the
//! trait boundaries they plug into (see [`traits`]).

pub mod broadcaster;
pub mod data_system;
pub mod error;
pub mod hybrid_store;
pub mod memory_store;
pub mod model;
pub mod persistent_store;
pub mod traits;

pub use broadcaster::{Broadcaster, Listener, ListenerId};
pub use data_system::{DataSystem, DataSystemConfig};
pub use error::{CoreError, Result};
pub use hybrid_store::HybridStore;
pub use memory_store::MemoryStore;
pub use model::{
    Basis, Collection, DataAvailability, DataKind, DataSourceError, DataSourceErrorKind,
    DataSourceState, DataSourceStatus, DataStoreStatus, Delta, Event, FlagChangeEvent, Item,
    ItemData, ItemDescriptor, KeyedItem, Selector,
};
pub use persistent_store::{PersistentStoreAdapter, PersistentStoreConfig, PersistentStoreMode};
pub use traits::{
    CancellationSignal, DataDestination, DataInitializer, DataSourceStatusSink,
    DataStoreStatusProvider, DataSynchronizer, PersistentStore, ReadOnlyStore, SyncReadySignal,
};
