//! In-memory record store with write-through persistence.
//!
//! The cache is authoritative. A durable write that fails is logged, counted
//! and left dirty for the next [`RecordStore::flush`]; the caller never sees
//! it. Once `alert_threshold` writes in a row have failed the store logs at
//! `error` and reports itself degraded until a write succeeds again.
//!
//! All mutations go through a single write gate held across the cache update
//! and the durable write, so the backend always receives versions in the
//! order they were committed. Reads only take the cache lock.

use crate::health::HealthCheck;
use crate::metrics::StoreMetrics;
use rollcall_core::backend::RecordBackend;
use rollcall_core::error::{SignupError, StorageError};
use rollcall_core::ids::RecordId;
use rollcall_core::record::EventRecord;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};

/// Durability requested for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persist {
    /// Write to the backend before returning
    WriteThrough,
    /// Mark dirty; written by the next [`RecordStore::flush`]
    Deferred,
}

/// Result of a flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Records written successfully
    pub written: usize,
    /// Records whose write failed (still dirty)
    pub failed: usize,
}

/// Cached, write-through record store.
pub struct RecordStore {
    backend: Arc<dyn RecordBackend>,
    records: RwLock<HashMap<RecordId, EventRecord>>,
    dirty: Mutex<HashSet<RecordId>>,
    write_gate: Mutex<()>,
    consecutive_failures: AtomicUsize,
    alert_threshold: usize,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("alert_threshold", &self.alert_threshold)
            .field(
                "consecutive_failures",
                &self.consecutive_failures.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

impl RecordStore {
    /// Create an empty store over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn RecordBackend>, alert_threshold: usize) -> Self {
        Self {
            backend,
            records: RwLock::new(HashMap::new()),
            dirty: Mutex::new(HashSet::new()),
            write_gate: Mutex::new(()),
            consecutive_failures: AtomicUsize::new(0),
            alert_threshold: alert_threshold.max(1),
        }
    }

    /// Create a store and warm its cache with every stored record.
    ///
    /// Records that fail their invariant check are skipped with a warning
    /// (reconciliation cannot repair a record it cannot trust).
    ///
    /// # Errors
    ///
    /// Returns the backend's error if the listing itself fails.
    pub async fn load(
        backend: Arc<dyn RecordBackend>,
        alert_threshold: usize,
    ) -> Result<Self, StorageError> {
        let store = Self::new(backend, alert_threshold);
        let stored = store.backend.list_all().await?;
        let mut loaded = 0usize;
        {
            let mut records = store.records.write().await;
            for record in stored {
                if let Err(reason) = record.check_invariants() {
                    tracing::warn!(record_id = %record.id, %reason, "Skipping stored record that breaks invariants");
                    continue;
                }
                records.insert(record.id.clone(), record);
                loaded += 1;
            }
        }
        tracing::info!(records = loaded, "Record store loaded");
        Ok(store)
    }

    /// Read a record.
    pub async fn get(&self, id: &RecordId) -> Option<EventRecord> {
        self.records.read().await.get(id).cloned()
    }

    /// `true` if the record is cached.
    pub async fn contains(&self, id: &RecordId) -> bool {
        self.records.read().await.contains_key(id)
    }

    /// Every cached record, in no particular order.
    pub async fn all(&self) -> Vec<EventRecord> {
        self.records.read().await.values().cloned().collect()
    }

    /// Number of cached records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// `true` if no records are cached.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Insert or replace a record.
    pub async fn set(&self, record: EventRecord, persist: Persist) {
        let _gate = self.write_gate.lock().await;
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        self.persist(&record, persist).await;
    }

    /// Insert a record only if its id is free. Returns `false` if taken.
    pub async fn insert_new(&self, record: EventRecord, persist: Persist) -> bool {
        let _gate = self.write_gate.lock().await;
        {
            let mut records = self.records.write().await;
            if records.contains_key(&record.id) {
                return false;
            }
            records.insert(record.id.clone(), record.clone());
        }
        self.persist(&record, persist).await;
        true
    }

    /// Read-modify-write one record.
    ///
    /// `mutate` runs against a scratch copy. On `Ok` the copy is committed
    /// (and persisted only if it differs from what was there); on `Err`
    /// nothing changes.
    ///
    /// # Errors
    ///
    /// [`SignupError::RecordNotFound`] if the id is unknown, or whatever
    /// `mutate` returns.
    pub async fn update<T, E, F>(
        &self,
        id: &RecordId,
        persist: Persist,
        mutate: F,
    ) -> Result<(EventRecord, T), E>
    where
        F: FnOnce(&mut EventRecord) -> Result<T, E>,
        E: From<SignupError>,
    {
        let _gate = self.write_gate.lock().await;
        let (record, output, changed) = {
            let mut records = self.records.write().await;
            let current = records
                .get_mut(id)
                .ok_or_else(|| SignupError::RecordNotFound(id.clone()))?;
            let mut scratch = current.clone();
            let output = mutate(&mut scratch)?;
            let changed = scratch != *current;
            if changed {
                *current = scratch.clone();
            }
            (scratch, output, changed)
        };
        if changed {
            self.persist(&record, persist).await;
        }
        Ok((record, output))
    }

    /// Remove a record from the cache and the backend.
    ///
    /// Returns `false` if it was not cached. A failed backend delete is
    /// logged; the record stays gone from memory.
    pub async fn delete(&self, id: &RecordId) -> bool {
        let _gate = self.write_gate.lock().await;
        let existed = self.records.write().await.remove(id).is_some();
        self.dirty.lock().await.remove(id);
        if let Err(error) = self.backend.delete(id).await {
            tracing::warn!(record_id = %id, %error, "Failed to delete record from backend");
            self.note_failure();
        }
        existed
    }

    /// Write every dirty record.
    pub async fn flush(&self) -> FlushReport {
        let _gate = self.write_gate.lock().await;
        let pending: Vec<RecordId> = self.dirty.lock().await.iter().cloned().collect();
        let mut report = FlushReport::default();

        for id in pending {
            let Some(record) = self.records.read().await.get(&id).cloned() else {
                self.dirty.lock().await.remove(&id);
                continue;
            };
            match self.backend.set(&record).await {
                Ok(()) => {
                    self.dirty.lock().await.remove(&id);
                    self.note_success();
                    report.written += 1;
                },
                Err(error) => {
                    tracing::warn!(record_id = %id, %error, "Flush write failed; record stays dirty");
                    self.note_failure();
                    report.failed += 1;
                },
            }
        }

        StoreMetrics::record_dirty(self.dirty.lock().await.len());
        if report.written + report.failed > 0 {
            tracing::debug!(written = report.written, failed = report.failed, "Store flushed");
        }
        report
    }

    /// Flush and log what could not be written. Call once on teardown.
    pub async fn shutdown(&self) -> FlushReport {
        let report = self.flush().await;
        if report.failed > 0 {
            tracing::error!(
                unpersisted = report.failed,
                "Shutting down with records that could not be persisted"
            );
        } else {
            tracing::info!(written = report.written, "Record store shut down");
        }
        report
    }

    /// Replace a cached record with the backup version the backend kept
    /// from before its latest write. Returns the restored record.
    ///
    /// # Errors
    ///
    /// The backend's error if the backup cannot be read.
    pub async fn restore_previous(
        &self,
        id: &RecordId,
    ) -> Result<Option<EventRecord>, StorageError> {
        let Some(previous) = self.backend.previous(id).await? else {
            return Ok(None);
        };
        if let Err(reason) = previous.check_invariants() {
            tracing::warn!(record_id = %id, %reason, "Backup version breaks invariants; not restoring");
            return Ok(None);
        }
        self.set(previous.clone(), Persist::WriteThrough).await;
        tracing::info!(record_id = %id, "Restored record from backup");
        Ok(Some(previous))
    }

    /// Number of records waiting for a flush.
    pub async fn dirty_count(&self) -> usize {
        self.dirty.lock().await.len()
    }

    /// Durable writes that have failed in a row.
    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Store health: degraded once the alert threshold is reached.
    pub async fn health(&self) -> HealthCheck {
        let failures = self.consecutive_failures();
        let check = if failures >= self.alert_threshold {
            HealthCheck::degraded(
                "store",
                format!("{failures} consecutive persistence failures"),
            )
        } else {
            HealthCheck::healthy("store")
        };
        check
            .with_metadata("records", self.len().await)
            .with_metadata("dirty", self.dirty_count().await)
            .with_metadata("consecutive_failures", failures)
    }

    async fn persist(&self, record: &EventRecord, persist: Persist) {
        match persist {
            Persist::Deferred => {
                let mut dirty = self.dirty.lock().await;
                dirty.insert(record.id.clone());
                StoreMetrics::record_dirty(dirty.len());
            },
            Persist::WriteThrough => match self.backend.set(record).await {
                Ok(()) => {
                    self.dirty.lock().await.remove(&record.id);
                    self.note_success();
                },
                Err(error) => {
                    tracing::warn!(record_id = %record.id, %error, "Persist failed; serving from memory");
                    self.dirty.lock().await.insert(record.id.clone());
                    self.note_failure();
                },
            },
        }
    }

    fn note_success(&self) {
        let before = self.consecutive_failures.swap(0, Ordering::AcqRel);
        if before >= self.alert_threshold {
            tracing::info!(failures = before, "Persistence recovered");
        }
    }

    fn note_failure(&self) {
        StoreMetrics::record_persist_failure();
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures == self.alert_threshold {
            tracing::error!(
                failures,
                "Persistence is failing repeatedly; durability degraded"
            );
        }
    }
}
