//! Client-local key/value storage.
//!
//! The anonymous identity lives here. Three backends:
//!
//! - [`MemoryStorage`] - scoped to the process, used by tests and by hosts
//!   that persist state themselves
//! - [`FileStorage`] - a JSON document on disk, one per storage scope
//! - [`UnavailableStorage`] - every operation fails, like a browser with
//!   storage disabled

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;
use tracing::warn;

/// Errors returned by a [`LocalStorage`] backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend refuses access.
    #[error("storage denied: {0}")]
    Denied(String),

    /// Reading or writing the backing file failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),

    /// The backing document is not valid JSON.
    #[error("storage document is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Abstraction over client-local key/value storage.
///
/// Mirrors the browser `localStorage` contract: string keys, string values,
/// synchronous access. Implementations must be safe to share across tasks.
///
/// Methods are called inline from async tasks, so each call should finish
/// quickly. A backend that may block for long belongs behind
/// `tokio::task::spawn_blocking` in the host.
pub trait LocalStorage: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be read.
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written.
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a value. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written.
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory storage scoped to the value's lifetime.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    /// Create an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>, StorageError> {
        self.items
            .lock()
            .map_err(|_| StorageError::Denied("memory storage lock poisoned".to_string()))
    }
}

impl LocalStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock()?.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// Storage persisted as a JSON object in a single file.
///
/// Writes go to a sibling temp file which is then renamed over the original,
/// so a crash never leaves a half-written document behind.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStorage {
    /// Use the document at `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn read_document(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_document(&self, document: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(document)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update<F>(&self, apply: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StorageError::Denied("file storage lock poisoned".to_string()))?;
        let mut document = match self.read_document() {
            Err(StorageError::Corrupt(e)) => {
                warn!(path = %self.path.display(), error = %e, "Overwriting corrupt storage document");
                BTreeMap::new()
            }
            other => other?,
        };
        apply(&mut document);
        self.write_document(&document)
    }
}

impl LocalStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_document()?.remove(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|document| {
            document.insert(key.to_owned(), value.to_owned());
        })
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.update(|document| {
            document.remove(key);
        })
    }
}

/// Storage that refuses every operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableStorage;

impl LocalStorage for UnavailableStorage {
    fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Denied("local storage is disabled".to_string()))
    }

    fn set_item(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Denied("local storage is disabled".to_string()))
    }

    fn remove_item(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Denied("local storage is disabled".to_string()))
    }
}
