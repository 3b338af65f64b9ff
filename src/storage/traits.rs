//! Abstract document storage contract.
//!
//! Documents are addressed by `(scope, key)` and kept as an ascending list of
//! caller-numbered versions. Storing an existing version replaces it; a new
//! version is inserted in order. Values are typed records serialized to JSON
//! through the [`Record`] trait, so only types that opt in can be stored.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A conditional write found a different latest version than expected.
    #[error("Version conflict on {scope}/{key}: expected latest {expected:?}, found {actual:?}")]
    VersionConflict {
        scope: String,
        key: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    /// A stored value has a different record type than the caller asked for.
    #[error("Record type mismatch: expected '{expected}', found '{actual}'")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },

    /// Another process has the store directory open.
    #[error("Store directory {dir} is held by another process")]
    Locked { dir: String, holder: Option<u32> },

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The backend could not be reached.
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

impl StorageError {
    /// Returns true if repeating the whole read-modify-write may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict { .. } | Self::ConnectionError(_))
    }
}

/// A serialized record together with its record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredValue {
    pub record_type: String,
    pub body: serde_json::Value,
}

/// A value and the version it was stored under.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// Precondition on the latest stored version of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VersionCheck {
    #[default]
    Unchecked,
    /// The key must have no versions yet.
    Absent,
    /// The key's latest version must be exactly this one.
    Latest(u64),
}

impl VersionCheck {
    /// Check that succeeds iff the latest version equals `expected` (`None` = absent).
    #[must_use]
    pub const fn latest(expected: Option<u64>) -> Self {
        match expected {
            Some(v) => Self::Latest(v),
            None => Self::Absent,
        }
    }

    #[must_use]
    pub const fn expected(&self) -> Option<u64> {
        match self {
            Self::Latest(v) => Some(*v),
            Self::Unchecked | Self::Absent => None,
        }
    }

    /// Returns true if a key whose latest version is `actual` satisfies the check.
    #[must_use]
    pub const fn accepts(&self, actual: Option<u64>) -> bool {
        match (self, actual) {
            (Self::Unchecked, _) | (Self::Absent, None) => true,
            (Self::Latest(want), Some(have)) => *want == have,
            _ => false,
        }
    }
}

/// One write inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreOp {
    pub scope: String,
    pub key: String,
    pub version: u64,
    pub value: StoredValue,
    #[serde(default)]
    pub check: VersionCheck,
}

impl StoreOp {
    pub fn new(scope: impl Into<String>, key: impl Into<String>, value: StoredValue, version: u64) -> Self {
        Self {
            scope: scope.into(),
            key: key.into(),
            version,
            value,
            check: VersionCheck::Unchecked,
        }
    }

    #[must_use]
    pub fn with_check(mut self, check: VersionCheck) -> Self {
        self.check = check;
        self
    }

    pub(crate) fn conflict(&self, actual: Option<u64>) -> StorageError {
        StorageError::VersionConflict {
            scope: self.scope.clone(),
            key: self.key.clone(),
            expected: self.check.expected(),
            actual,
        }
    }
}

/// Versioned key/value storage for typed documents.
///
/// # Safety Considerations
/// - `store_batch` must apply all operations or none
/// - Implementations should handle concurrent access safely
pub trait DocumentStore: Send + Sync {
    /// Store `value` under `version`, replacing that version if present.
    fn store(&self, scope: &str, key: &str, value: StoredValue, version: u64) -> Result<(), StorageError> {
        self.store_batch(vec![StoreOp::new(scope, key, value, version)])
    }

    /// The highest stored version of a key.
    fn retrieve_latest(&self, scope: &str, key: &str) -> Result<Option<Versioned<StoredValue>>, StorageError>;

    /// All stored versions of a key, ascending.
    fn retrieve_all_versions(&self, scope: &str, key: &str) -> Result<Vec<Versioned<StoredValue>>, StorageError>;

    /// Latest version of every key in `scope` whose latest value has `record_type`, ordered by key.
    fn list_by_type(
        &self,
        scope: &str,
        record_type: &str,
    ) -> Result<Vec<(String, Versioned<StoredValue>)>, StorageError>;

    /// Apply every operation or none of them.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::VersionConflict` if any operation's check fails;
    /// nothing is written in that case.
    fn store_batch(&self, ops: Vec<StoreOp>) -> Result<(), StorageError>;

    /// Store only if the key's latest version is still `expected_latest`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::VersionConflict` when another writer got there first.
    fn store_if_latest(
        &self,
        scope: &str,
        key: &str,
        value: StoredValue,
        version: u64,
        expected_latest: Option<u64>,
    ) -> Result<(), StorageError> {
        self.store_batch(vec![
            StoreOp::new(scope, key, value, version).with_check(VersionCheck::latest(expected_latest)),
        ])
    }
}

/// A type that can be stored as a document.
pub trait Record: Serialize + DeserializeOwned {
    /// Stable tag written next to the body; used by `list_by_type`.
    const RECORD_TYPE: &'static str;

    /// # Errors
    ///
    /// Returns `StorageError::SerializationError` if the value cannot be encoded.
    fn to_stored(&self) -> Result<StoredValue, StorageError> {
        let body = serde_json::to_value(self).map_err(|e| StorageError::SerializationError(e.to_string()))?;
        Ok(StoredValue {
            record_type: Self::RECORD_TYPE.to_string(),
            body,
        })
    }

    /// # Errors
    ///
    /// Returns `StorageError::TypeMismatch` for a value of another record type
    /// and `StorageError::SerializationError` for a body that does not decode.
    fn from_stored(value: StoredValue) -> Result<Self, StorageError> {
        if value.record_type != Self::RECORD_TYPE {
            return Err(StorageError::TypeMismatch {
                expected: Self::RECORD_TYPE,
                actual: value.record_type,
            });
        }
        serde_json::from_value(value.body).map_err(|e| StorageError::SerializationError(e.to_string()))
    }
}

/// Typed helpers over any [`DocumentStore`], including trait objects.
pub trait RecordStoreExt: DocumentStore {
    /// # Errors
    ///
    /// Propagates serialization and backend errors.
    fn store_record<R: Record>(&self, scope: &str, key: &str, record: &R, version: u64) -> Result<(), StorageError> {
        self.store(scope, key, record.to_stored()?, version)
    }

    /// # Errors
    ///
    /// Propagates decoding and backend errors.
    fn load_record<R: Record>(&self, scope: &str, key: &str) -> Result<Option<Versioned<R>>, StorageError> {
        self.retrieve_latest(scope, key)?
            .map(|v| {
                Ok(Versioned {
                    version: v.version,
                    value: R::from_stored(v.value)?,
                })
            })
            .transpose()
    }

    /// # Errors
    ///
    /// Propagates decoding and backend errors.
    fn list_records<R: Record>(&self, scope: &str) -> Result<Vec<(String, Versioned<R>)>, StorageError> {
        self.list_by_type(scope, R::RECORD_TYPE)?
            .into_iter()
            .map(|(key, v)| {
                Ok((
                    key,
                    Versioned {
                        version: v.version,
                        value: R::from_stored(v.value)?,
                    },
                ))
            })
            .collect()
    }
}

impl<S: DocumentStore + ?Sized> RecordStoreExt for S {}
