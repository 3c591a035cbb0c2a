//! Persistence backend trait.
//!
//! A key-value store keyed by record id. Writes retain the immediately prior
//! version of a record as a backup before overwriting it, so a half-applied
//! write can be recovered from.
//!
//! # Implementations
//!
//! - `JsonFileBackend` (in `rollcall-runtime`): one JSON file per record plus a `.bak`
//! - `PostgresRecordBackend` (in `rollcall-postgres`): one row per record, JSONB payload
//! - `InMemoryBackend` (in `rollcall-testing`): fast, deterministic, failure injection
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` instead of using `async fn` so the
//! store can hold an `Arc<dyn RecordBackend>`.

use crate::error::StorageError;
use crate::ids::RecordId;
use crate::record::EventRecord;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by backend methods.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Durable storage for signup records.
pub trait RecordBackend: Send + Sync {
    /// Load one record.
    ///
    /// # Errors
    ///
    /// `Backend`/`Io` on storage failure, `Serialization` on a corrupt payload.
    fn get(&self, id: &RecordId) -> BackendFuture<'_, Option<EventRecord>>;

    /// Insert or overwrite a record, keeping the previous version as backup.
    ///
    /// # Errors
    ///
    /// Any storage failure. The previous version must survive a failed write.
    fn set(&self, record: &EventRecord) -> BackendFuture<'_, ()>;

    /// Remove a record (and its backup). Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Any storage failure.
    fn delete(&self, id: &RecordId) -> BackendFuture<'_, bool>;

    /// Load every stored record.
    ///
    /// Corrupt entries are skipped with a warning rather than failing the
    /// whole listing.
    ///
    /// # Errors
    ///
    /// Storage failure while enumerating.
    fn list_all(&self) -> BackendFuture<'_, Vec<EventRecord>>;

    /// The version a record had before its most recent write, if retained.
    ///
    /// # Errors
    ///
    /// Any storage failure.
    fn previous(&self, id: &RecordId) -> BackendFuture<'_, Option<EventRecord>>;
}
