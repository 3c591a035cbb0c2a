//! JSON-file persistence backend.
//!
//! One pretty-printed file per record, `<dir>/<id>.json`. Before a record is
//! overwritten its current file is copied to `<id>.json.bak`; the new
//! contents are written to a temp file in the same directory and renamed
//! into place, so a reader sees either the old or the new version, never a
//! torn one.
//!
//! Filesystem work runs on the blocking pool.

use rollcall_core::backend::{BackendFuture, RecordBackend};
use rollcall_core::error::StorageError;
use rollcall_core::ids::RecordId;
use rollcall_core::record::EventRecord;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

const EXTENSION: &str = "json";
const BACKUP_EXTENSION: &str = "json.bak";

/// [`RecordBackend`] over a directory of JSON files.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    dir: Arc<PathBuf>,
}

impl JsonFileBackend {
    /// Open (creating if needed) a data directory.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir: Arc::new(dir) })
    }

    /// The data directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn paths(&self, id: &RecordId) -> Result<(PathBuf, PathBuf), StorageError> {
        let name = id.as_str();
        if name.is_empty()
            || name.starts_with('.')
            || name.contains(['/', '\\', '\0'])
        {
            return Err(StorageError::Backend(format!(
                "record id '{name}' is not a valid file name"
            )));
        }
        Ok((
            self.dir.join(format!("{name}.{EXTENSION}")),
            self.dir.join(format!("{name}.{BACKUP_EXTENSION}")),
        ))
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T, StorageError> + Send + 'static,
    {
        let dir = Arc::clone(&self.dir);
        tokio::task::spawn_blocking(move || work(&dir))
            .await
            .map_err(|e| StorageError::Backend(format!("blocking task failed: {e}")))?
    }
}

fn read_record(path: &Path) -> Result<Option<EventRecord>, StorageError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StorageError::Io(e.error))?;
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<bool, StorageError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error.into()),
    }
}

impl RecordBackend for JsonFileBackend {
    fn get(&self, id: &RecordId) -> BackendFuture<'_, Option<EventRecord>> {
        let paths = self.paths(id);
        Box::pin(async move {
            let (path, _) = paths?;
            self.blocking(move |_| read_record(&path)).await
        })
    }

    fn set(&self, record: &EventRecord) -> BackendFuture<'_, ()> {
        let paths = self.paths(&record.id);
        let bytes = serde_json::to_vec_pretty(record);
        Box::pin(async move {
            let (path, backup) = paths?;
            let bytes = bytes?;
            self.blocking(move |dir| {
                if path.exists() {
                    fs::copy(&path, &backup)?;
                }
                write_atomic(dir, &path, &bytes)
            })
            .await
        })
    }

    fn delete(&self, id: &RecordId) -> BackendFuture<'_, bool> {
        let paths = self.paths(id);
        Box::pin(async move {
            let (path, backup) = paths?;
            self.blocking(move |_| {
                let existed = remove_if_present(&path)?;
                remove_if_present(&backup)?;
                Ok(existed)
            })
            .await
        })
    }

    fn list_all(&self) -> BackendFuture<'_, Vec<EventRecord>> {
        Box::pin(async move {
            self.blocking(|dir| {
                let mut records = Vec::new();
                for entry in fs::read_dir(dir)? {
                    let path = entry?.path();
                    if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                        continue;
                    }
                    match read_record(&path) {
                        Ok(Some(record)) => records.push(record),
                        Ok(None) => {},
                        Err(error) => {
                            let backup = path.with_extension(BACKUP_EXTENSION);
                            match read_record(&backup) {
                                Ok(Some(record)) => {
                                    tracing::warn!(path = %path.display(), %error, "Corrupt record file; using backup");
                                    records.push(record);
                                },
                                _ => {
                                    tracing::warn!(path = %path.display(), %error, "Corrupt record file skipped");
                                },
                            }
                        },
                    }
                }
                records.sort_by(|a, b| a.id.cmp(&b.id));
                Ok(records)
            })
            .await
        })
    }

    fn previous(&self, id: &RecordId) -> BackendFuture<'_, Option<EventRecord>> {
        let paths = self.paths(id);
        Box::pin(async move {
            let (_, backup) = paths?;
            self.blocking(move |_| read_record(&backup)).await
        })
    }
}
