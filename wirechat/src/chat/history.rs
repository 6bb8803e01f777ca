//! Persistence of the conversation log.
//!
//! Defines the [`HistoryStore`] trait plus two implementations:
//! - [`InMemoryHistory`]: process-local store, used by tests and when
//!   persistence is disabled
//! - [`JsonFileHistory`]: the whole log as one JSON array on disk
//!
//! The conversation store writes the full log after every change. A write
//! failure is logged and reported to subscribers; it never alters the
//! in-memory log.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::message::Message;

/// Errors that can occur during history storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A write operation failed.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// A read operation failed.
    #[error("read failed: {0}")]
    ReadFailed(String),

    /// The stored log could not be decoded.
    #[error("corrupt history: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Persists the ordered conversation log.
pub trait HistoryStore: Send {
    /// Replace the stored log with `messages`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the log could not be written.
    fn save(&self, messages: &[Message]) -> Result<(), StoreError>;

    /// Load the stored log. An absent log is empty, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the log exists but cannot be read.
    fn load(&self) -> Result<Vec<Message>, StoreError>;

    /// Release the stored log.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the log could not be removed.
    fn clear(&self) -> Result<(), StoreError>;
}

impl<H: HistoryStore + ?Sized> HistoryStore for Box<H> {
    fn save(&self, messages: &[Message]) -> Result<(), StoreError> {
        (**self).save(messages)
    }

    fn load(&self) -> Result<Vec<Message>, StoreError> {
        (**self).load()
    }

    fn clear(&self) -> Result<(), StoreError> {
        (**self).clear()
    }
}

/// In-memory history. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHistory {
    messages: Arc<Mutex<Vec<Message>>>,
}

impl InMemoryHistory {
    /// Create an empty in-memory history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an in-memory history pre-filled with `messages`.
    #[must_use]
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages: Arc::new(Mutex::new(messages)),
        }
    }

    /// Snapshot of the stored log.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }
}

impl HistoryStore for InMemoryHistory {
    fn save(&self, messages: &[Message]) -> Result<(), StoreError> {
        *self.messages.lock() = messages.to_vec();
        Ok(())
    }

    fn load(&self) -> Result<Vec<Message>, StoreError> {
        Ok(self.snapshot())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.messages.lock().clear();
        Ok(())
    }
}

/// History kept as a JSON array in a single file.
///
/// Writes go to a sibling temporary file which is then renamed over the
/// target, so a crash mid-write leaves the previous log intact.
#[derive(Debug, Clone)]
pub struct JsonFileHistory {
    path: PathBuf,
}

impl JsonFileHistory {
    /// Store the log at `path`. Parent directories are created on first save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl HistoryStore for JsonFileHistory {
    fn save(&self, messages: &[Message]) -> Result<(), StoreError> {
        let write_err = |e: io::Error| StoreError::WriteFailed(format!("{}: {e}", self.path.display()));

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let json = serde_json::to_vec_pretty(messages)?;
        let tmp = self.temp_path();
        std::fs::write(&tmp, json).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)?;

        tracing::trace!(path = %self.path.display(), count = messages.len(), "history saved");
        Ok(())
    }

    fn load(&self) -> Result<Vec<Message>, StoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StoreError::ReadFailed(format!(
                "{}: {e}",
                self.path.display()
            ))),
        }
    }

    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::WriteFailed(format!(
                "{}: {e}",
                self.path.display()
            ))),
        }
    }
}
