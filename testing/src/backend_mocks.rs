//! In-memory persistence backend for fast, deterministic tests.
//!
//! Behaves like the durable backends (the prior version of a record is kept
//! on every write) and can be told to fail, so tests can exercise the store's
//! degraded-durability path without a real database.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use rollcall_core::backend::{BackendFuture, RecordBackend};
use rollcall_core::error::StorageError;
use rollcall_core::ids::RecordId;
use rollcall_core::record::EventRecord;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct Inner {
    current: HashMap<RecordId, EventRecord>,
    previous: HashMap<RecordId, EventRecord>,
}

/// `HashMap`-backed [`RecordBackend`].
///
/// # Example
///
/// ```
/// use rollcall_testing::InMemoryBackend;
/// use rollcall_testing::fixtures::RaidBuilder;
/// use rollcall_core::backend::RecordBackend;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = InMemoryBackend::new();
/// let record = RaidBuilder::new("r1").slot("Tank", "🛡️", 1).build();
/// backend.set(&record).await?;
/// assert!(backend.get(&record.id).await?.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryBackend {
    inner: Arc<RwLock<Inner>>,
    fail_writes: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl InMemoryBackend {
    /// Create a new empty backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend pre-loaded with records (no backups)
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = EventRecord>) -> Self {
        let backend = Self::new();
        {
            let mut inner = backend.inner.write().unwrap();
            for record in records {
                inner.current.insert(record.id.clone(), record);
            }
        }
        backend
    }

    /// Make every subsequent `set`/`delete` fail until turned off again
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Snapshot of a stored record, bypassing the async API
    #[must_use]
    pub fn stored(&self, id: &RecordId) -> Option<EventRecord> {
        self.inner.read().unwrap().current.get(id).cloned()
    }

    /// Number of stored records
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().current.len()
    }

    /// Check if the backend is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().current.is_empty()
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected write failure".to_string()));
        }
        Ok(())
    }
}

impl RecordBackend for InMemoryBackend {
    fn get(&self, id: &RecordId) -> BackendFuture<'_, Option<EventRecord>> {
        let record = self.inner.read().unwrap().current.get(id).cloned();
        Box::pin(async move { Ok(record) })
    }

    fn set(&self, record: &EventRecord) -> BackendFuture<'_, ()> {
        let record = record.clone();
        Box::pin(async move {
            self.check_writable()?;
            let mut inner = self.inner.write().unwrap();
            if let Some(old) = inner.current.insert(record.id.clone(), record) {
                inner.previous.insert(old.id.clone(), old);
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn delete(&self, id: &RecordId) -> BackendFuture<'_, bool> {
        let id = id.clone();
        Box::pin(async move {
            self.check_writable()?;
            let mut inner = self.inner.write().unwrap();
            inner.previous.remove(&id);
            Ok(inner.current.remove(&id).is_some())
        })
    }

    fn list_all(&self) -> BackendFuture<'_, Vec<EventRecord>> {
        let mut records: Vec<EventRecord> =
            self.inner.read().unwrap().current.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Box::pin(async move { Ok(records) })
    }

    fn previous(&self, id: &RecordId) -> BackendFuture<'_, Option<EventRecord>> {
        let record = self.inner.read().unwrap().previous.get(id).cloned();
        Box::pin(async move { Ok(record) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::RaidBuilder;

    #[tokio::test]
    async fn set_keeps_previous_version() {
        let backend = InMemoryBackend::new();
        let first = RaidBuilder::new("r1").slot("Tank", "T", 1).build();
        let mut second = first.clone();
        second.title = "Renamed".into();

        backend.set(&first).await.unwrap();
        backend.set(&second).await.unwrap();

        assert_eq!(backend.get(&first.id).await.unwrap(), Some(second));
        assert_eq!(backend.previous(&first.id).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn injected_failures_leave_data_alone() {
        let record = RaidBuilder::new("r1").slot("Tank", "T", 1).build();
        let backend = InMemoryBackend::with_records([record.clone()]);
        backend.fail_writes(true);
        assert!(backend.delete(&record.id).await.is_err());
        assert_eq!(backend.len(), 1);
        backend.fail_writes(false);
        assert!(backend.delete(&record.id).await.unwrap());
        assert!(backend.is_empty());
    }
}
