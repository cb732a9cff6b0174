use thiserror::Error;

/// Crate-wide error type for the core data system.
///
/// Mirrors the error taxonomy of spec.md §7: each variant is a recovery
/// class the coordinator or store already knows how to react to, not a
/// raw wrapper over a foreign error type.
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    #[error("initializer failed: {0}")]
    InitializerFailed(String),

    #[error("context cancelled")]
    ContextCancelled,

    /// Reserved for a future opaque-payload decoding path (spec.md §7).
    /// `MemoryStore` treats item payloads as opaque bytes today, so
    /// nothing in this crate constructs this variant yet; a
    /// `DataInitializer`/`DataSynchronizer` that does its own decoding
    /// ahead of `SetBasis`/`ApplyDelta` can still surface failures
    /// through it.
    #[error("memory store decode error: {0}")]
    MemoryStoreDecode(String),

    #[error("persistent store write error: {0}")]
    PersistentStoreWrite(String),

    #[error("persistent store read error: {0}")]
    PersistentStoreRead(String),

    #[error("data system already stopped")]
    AlreadyStopped,

    #[error("lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl<T> From<std::sync::PoisonError<T>> for CoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
