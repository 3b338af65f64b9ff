//! In-memory storage backend.
//!
//! Thread-safe implementation of [`DocumentStore`] intended for embedded
//! usage, tests, and as the index behind the persistent backend.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::storage::traits::{DocumentStore, StorageError, StoreOp, StoredValue, Versioned};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

type Versions = BTreeMap<u64, StoredValue>;

#[derive(Debug, Default)]
struct State {
    /// scope -> key -> version -> value
    scopes: BTreeMap<String, BTreeMap<String, Versions>>,
}

impl State {
    fn versions(&self, scope: &str, key: &str) -> Option<&Versions> {
        self.scopes.get(scope).and_then(|keys| keys.get(key))
    }

    fn latest_version(&self, scope: &str, key: &str) -> Option<u64> {
        self.versions(scope, key)
            .and_then(|versions| versions.keys().next_back().copied())
    }

    fn apply(&mut self, op: StoreOp) {
        self.scopes
            .entry(op.scope)
            .or_default()
            .entry(op.key)
            .or_default()
            .insert(op.version, op.value);
    }
}

/// Versioned documents held in memory.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    state: RwLock<State>,
}

impl InMemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks every operation, runs `before_apply`, then applies them, all
    /// under one write lock. Nothing is applied if a check or the hook fails.
    pub(crate) fn commit_with(
        &self,
        ops: Vec<StoreOp>,
        before_apply: impl FnOnce(&[StoreOp]) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("document.store_batch"))?;
        for op in &ops {
            let actual = state.latest_version(&op.scope, &op.key);
            if !op.check.accepts(actual) {
                return Err(op.conflict(actual));
            }
        }
        before_apply(&ops)?;
        for op in ops {
            state.apply(op);
        }
        Ok(())
    }

    /// Applies operations without checking them; used when replaying a log.
    pub(crate) fn apply_unchecked(&self, ops: Vec<StoreOp>) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("document.replay"))?;
        for op in ops {
            state.apply(op);
        }
        Ok(())
    }

    /// Number of distinct keys across all scopes.
    pub fn key_count(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("document.key_count"))?;
        Ok(state.scopes.values().map(BTreeMap::len).sum())
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn retrieve_latest(&self, scope: &str, key: &str) -> Result<Option<Versioned<StoredValue>>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("document.retrieve_latest"))?;
        Ok(state
            .versions(scope, key)
            .and_then(|versions| versions.iter().next_back())
            .map(|(version, value)| Versioned {
                version: *version,
                value: value.clone(),
            }))
    }

    fn retrieve_all_versions(&self, scope: &str, key: &str) -> Result<Vec<Versioned<StoredValue>>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("document.retrieve_all_versions"))?;
        Ok(state
            .versions(scope, key)
            .map(|versions| {
                versions
                    .iter()
                    .map(|(version, value)| Versioned {
                        version: *version,
                        value: value.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn list_by_type(
        &self,
        scope: &str,
        record_type: &str,
    ) -> Result<Vec<(String, Versioned<StoredValue>)>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("document.list_by_type"))?;
        let Some(keys) = state.scopes.get(scope) else {
            return Ok(Vec::new());
        };
        Ok(keys
            .iter()
            .filter_map(|(key, versions)| {
                let (version, value) = versions.iter().next_back()?;
                (value.record_type == record_type).then(|| {
                    (
                        key.clone(),
                        Versioned {
                            version: *version,
                            value: value.clone(),
                        },
                    )
                })
            })
            .collect())
    }

    fn store_batch(&self, ops: Vec<StoreOp>) -> Result<(), StorageError> {
        self.commit_with(ops, |_| Ok(()))
    }
}
