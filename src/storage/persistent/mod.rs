//! Durable file-backed document store.
//!
//! A store directory holds two files:
//!
//! ```text
//! <dir>/.lock        exclusive flock / LockFileEx, holds the owner's pid
//! <dir>/commit.log   one sequence-numbered, CRC32-checked frame per batch
//! ```
//!
//! Reads are served from an in-memory index rebuilt by replaying the log on
//! open. A write is checked against the index, appended to the log as one
//! frame, and only then applied to the index; a failed append leaves both
//! the index and the log as they were.

mod codec;
mod file_lock;
mod log;

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::storage::memory::InMemoryDocumentStore;
use crate::storage::traits::{DocumentStore, StorageError, StoreOp, StoredValue, Versioned};

use file_lock::DirLock;
use log::CommitLog;

const LOG_FILE: &str = "commit.log";

/// A [`DocumentStore`] persisted to a directory.
#[derive(Debug)]
pub struct FileDocumentStore {
    dir: PathBuf,
    index: InMemoryDocumentStore,
    log: CommitLog,
    _lock: DirLock,
}

impl FileDocumentStore {
    /// Opens a store with the default [`StorageConfig`].
    ///
    /// # Errors
    ///
    /// See [`FileDocumentStore::open_with`].
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open_with(dir, &StorageConfig::default())
    }

    /// Opens or creates a store in `dir` and replays its log.
    ///
    /// # Errors
    /// - `StorageError::Locked` if another process has the directory open
    /// - `StorageError::BackendError` if the directory or log cannot be used
    pub fn open_with(dir: impl AsRef<Path>, config: &StorageConfig) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| StorageError::BackendError(format!("create store directory: {e}")))?;
        let lock = DirLock::acquire(dir)?;
        let (log, entries) = CommitLog::open(&dir.join(LOG_FILE), config)?;

        let index = InMemoryDocumentStore::new();
        let replayed = entries.len();
        for (_, entry) in entries {
            index.apply_unchecked(entry.ops)?;
        }

        info!(
            dir = %dir.display(),
            replayed,
            sequence = log.current_sequence(),
            "Document store opened"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            index,
            log,
            _lock: lock,
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Sequence number of the last committed batch.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.log.current_sequence()
    }
}

impl DocumentStore for FileDocumentStore {
    fn retrieve_latest(&self, scope: &str, key: &str) -> Result<Option<Versioned<StoredValue>>, StorageError> {
        self.index.retrieve_latest(scope, key)
    }

    fn retrieve_all_versions(&self, scope: &str, key: &str) -> Result<Vec<Versioned<StoredValue>>, StorageError> {
        self.index.retrieve_all_versions(scope, key)
    }

    fn list_by_type(
        &self,
        scope: &str,
        record_type: &str,
    ) -> Result<Vec<(String, Versioned<StoredValue>)>, StorageError> {
        self.index.list_by_type(scope, record_type)
    }

    fn store_batch(&self, ops: Vec<StoreOp>) -> Result<(), StorageError> {
        let count = ops.len();
        self.index.commit_with(ops, |ops| {
            let sequence = self.log.append(ops)?;
            debug!(sequence, ops = count, "Batch committed");
            Ok(())
        })
    }
}
