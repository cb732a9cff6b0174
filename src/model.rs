//! Wire-adjacent data model shared by every component of the core: the
//! versioned item representation, the opaque payload selector, the wire
//! event variants, and the basis/delta envelopes built from them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// A category of stored configuration. At minimum `Features` and
/// `Segments`; consumers may register further kinds but the core treats
/// every kind identically, keyed only by its stable namespace string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataKind {
    Features,
    Segments,
}

impl DataKind {
    /// The stable string namespace used for wire encoding and as the
    /// first half of the `(kind, key)` versioning identity.
    pub fn namespace(&self) -> &'static str {
        match self {
            DataKind::Features => "features",
            DataKind::Segments => "segments",
        }
    }

    /// Whether a deletion for this kind should be retained as a
    /// tombstone (true for every kind the core currently knows about;
    /// kept as a method rather than a constant so a future kind can
    /// opt out without touching callers).
    pub fn retains_tombstones(&self) -> bool {
        true
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

/// An opaque, deserialization-deferred payload for a stored item. The
/// core never inspects the bytes; it only compares versions and hands
/// the bytes to the evaluator on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemData(pub Vec<u8>);

/// `{version, item}`. A tombstone is a real, comparable stored value —
/// it is never removed from the map, only superseded by a higher
/// version (invariant 2 of spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDescriptor {
    pub version: i64,
    pub item: Item,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Item {
    Tombstone,
    Present(ItemData),
}

impl ItemDescriptor {
    pub fn present(version: i64, data: ItemData) -> Self {
        Self { version, item: Item::Present(data) }
    }

    pub fn tombstone(version: i64) -> Self {
        Self { version, item: Item::Tombstone }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.item, Item::Tombstone)
    }
}

/// `{key, descriptor}` — one entry of a [`Collection`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedItem {
    pub key: String,
    pub descriptor: ItemDescriptor,
}

/// The unit of bulk initialization: every item of one [`DataKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub kind: DataKind,
    pub items: Vec<KeyedItem>,
}

/// An opaque payload identifier assigned by the upstream. The core
/// stores and exposes it verbatim; it never parses `state`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Selector {
    inner: Option<SelectorValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SelectorValue {
    state: String,
    version: i64,
}

impl Selector {
    pub fn none() -> Self {
        Self { inner: None }
    }

    pub fn new(state: impl Into<String>, version: i64) -> Self {
        Self { inner: Some(SelectorValue { state: state.into(), version }) }
    }

    pub fn is_set(&self) -> bool {
        self.inner.is_some()
    }

    pub fn state(&self) -> Option<&str> {
        self.inner.as_ref().map(|v| v.state.as_str())
    }

    pub fn version(&self) -> Option<i64> {
        self.inner.as_ref().map(|v| v.version)
    }
}

/// A wire-level delta element. `ServerIntent`/`PayloadTransferred` are
/// protocol framing the core only needs for completeness signaling —
/// they carry no data the store acts on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Put { kind: DataKind, key: String, data: ItemData, version: i64 },
    Delete { kind: DataKind, key: String, version: i64 },
    ServerIntent { description: String },
    PayloadTransferred,
}

/// A complete replacement payload for all kinds, produced by an
/// initializer or by a synchronizer's first authoritative delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Basis {
    pub events: Vec<Event>,
    pub selector: Selector,
    /// Whether this basis is trustworthy enough to mirror to the
    /// persistent store (true for upstream payloads, false for e.g.
    /// local file initializers).
    pub persist: bool,
}

impl Basis {
    pub fn new(events: Vec<Event>, selector: Selector, persist: bool) -> Self {
        Self { events, selector, persist }
    }
}

/// An incremental list of per-item events applied on top of an existing
/// basis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub events: Vec<Event>,
    pub selector: Selector,
    pub persist: bool,
}

/// The three values of data availability, ranked by trustworthiness of
/// the data the SDK will evaluate against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataAvailability {
    /// No data known at all.
    Defaults,
    /// Persistent-store data only, possibly stale.
    Cached,
    /// Memory store holds an upstream-confirmed payload.
    Refreshed,
}

/// Translates wire [`Event`]s into per-kind [`Collection`]s, grouping by
/// `kind` and decoding `Put`/`Delete` into [`ItemDescriptor`]s.
/// `ServerIntent`/`PayloadTransferred` carry no storable item and are
/// skipped.
pub fn events_to_collections(events: &[Event]) -> Vec<Collection> {
    use std::collections::BTreeMap;

    let mut by_kind: BTreeMap<DataKind, Vec<KeyedItem>> = BTreeMap::new();
    for event in events {
        match event {
            Event::Put { kind, key, data, version } => {
                by_kind.entry(*kind).or_default().push(KeyedItem {
                    key: key.clone(),
                    descriptor: ItemDescriptor::present(*version, data.clone()),
                });
            }
            Event::Delete { kind, key, version } => {
                by_kind.entry(*kind).or_default().push(KeyedItem {
                    key: key.clone(),
                    descriptor: ItemDescriptor::tombstone(*version),
                });
            }
            Event::ServerIntent { .. } | Event::PayloadTransferred => {}
        }
    }

    by_kind
        .into_iter()
        .map(|(kind, items)| Collection { kind, items })
        .collect()
}

/// The primary synchronizer's connection lifecycle, broadcast on the
/// data-source status channel (SPEC_FULL.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSourceState {
    Initializing,
    Valid,
    Interrupted,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSourceErrorKind {
    NetworkError,
    ErrorResponse { status_code: u16 },
    InvalidData,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceError {
    pub kind: DataSourceErrorKind,
}

/// A data-source status envelope. `state_since` is not serialized (it is
/// a local wall-clock bookmark for observers, not wire data) — `Instant`
/// has no stable external representation, so the status channel is
/// in-process only, matching spec.md's framing of broadcasters as an
/// in-process pub/sub fabric.
#[derive(Debug, Clone)]
pub struct DataSourceStatus {
    pub state: DataSourceState,
    pub state_since: Instant,
    pub last_error: Option<DataSourceError>,
}

impl DataSourceStatus {
    pub fn new(state: DataSourceState) -> Self {
        Self { state, state_since: Instant::now(), last_error: None }
    }

    pub fn with_error(state: DataSourceState, error: DataSourceError) -> Self {
        Self { state, state_since: Instant::now(), last_error: Some(error) }
    }
}

/// `{available, needs_refresh}` — broadcast on the data-store status
/// channel by a [`crate::persistent_store::PersistentStoreAdapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataStoreStatus {
    pub available: bool,
    pub needs_refresh: bool,
}

/// Emitted by `HybridStore` after a `features`-kind item's version
/// actually advances during `SetBasis`/`ApplyDelta`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagChangeEvent {
    pub key: String,
}
