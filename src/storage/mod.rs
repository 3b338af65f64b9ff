//! Versioned document storage.
//!
//! The engine talks to storage only through [`DocumentStore`]. The in-memory
//! backend is always available; the file-backed one sits behind the
//! `persistent` feature.

mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::InMemoryDocumentStore;
pub use traits::{
    DocumentStore, Record, RecordStoreExt, StorageError, StoreOp, StoredValue, VersionCheck, Versioned,
};
