//! Durability tests for the file-backed document store.
//!
//! Run with: cargo test --features persistent --test persistent_store

#![cfg(feature = "persistent")]

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;

use serde_json::json;
use tempfile::tempdir;

use dialectic::storage::{StoreOp, StoredValue, VersionCheck};
use dialectic::{
    CancellationToken, DialecticEngine, DialecticType, DocumentStore, EngineConfig, FileDocumentStore,
    ScriptedCollaborator, SelfModelId, StorageConfig, StorageError, UpdateRequest,
};

fn note(n: i64) -> StoredValue {
    StoredValue {
        record_type: "note".to_string(),
        body: json!({ "n": n }),
    }
}

/// Test that committed batches survive a reopen.
#[test]
fn test_reopen_replays_log() {
    let dir = tempdir().unwrap();

    {
        let store = FileDocumentStore::open(dir.path()).unwrap();
        store.store("s", "a", note(1), 1).unwrap();
        store.store("s", "a", note(2), 2).unwrap();
        store.store("s", "b", note(3), 1).unwrap();
        assert_eq!(store.sequence(), 3);
    }

    let store = FileDocumentStore::open(dir.path()).unwrap();
    assert_eq!(store.sequence(), 3);
    let latest = store.retrieve_latest("s", "a").unwrap().unwrap();
    assert_eq!(latest.version, 2);
    assert_eq!(latest.value, note(2));
    assert_eq!(store.retrieve_all_versions("s", "a").unwrap().len(), 2);
    assert_eq!(store.list_by_type("s", "note").unwrap().len(), 2);
    assert!(store.retrieve_latest("other", "a").unwrap().is_none());
}

/// Test that a rejected batch writes nothing, in memory or on disk.
#[test]
fn test_conflicting_batch_is_not_logged() {
    let dir = tempdir().unwrap();

    {
        let store = FileDocumentStore::open(dir.path()).unwrap();
        store.store("s", "a", note(1), 1).unwrap();

        let err = store
            .store_batch(vec![
                StoreOp::new("s", "b", note(10), 1),
                StoreOp::new("s", "a", note(11), 2).with_check(VersionCheck::latest(Some(7))),
            ])
            .unwrap_err();
        assert!(matches!(err, StorageError::VersionConflict { .. }));
        assert!(err.is_retryable());
        assert!(store.retrieve_latest("s", "b").unwrap().is_none());
        assert_eq!(store.sequence(), 1);
    }

    let store = FileDocumentStore::open(dir.path()).unwrap();
    assert!(store.retrieve_latest("s", "b").unwrap().is_none());
    assert_eq!(store.retrieve_latest("s", "a").unwrap().unwrap().version, 1);
}

/// Test that a torn final entry is dropped and later writes still land.
#[test]
fn test_torn_tail_is_truncated() {
    let dir = tempdir().unwrap();
    let log_path = dir.path().join("commit.log");

    {
        let store = FileDocumentStore::open(dir.path()).unwrap();
        for i in 1..=3 {
            store.store("s", "a", note(i), u64::try_from(i).unwrap()).unwrap();
        }
    }

    let intact_len = fs::metadata(&log_path).unwrap().len();
    {
        // Half a frame header: a kind byte and part of a sequence number.
        let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
        file.write_all(&[0x01, 0xFF, 0x00, 0x00, 0x00, 0x01, 0x02]).unwrap();
    }

    {
        let store = FileDocumentStore::open(dir.path()).unwrap();
        assert_eq!(fs::metadata(&log_path).unwrap().len(), intact_len);
        assert_eq!(store.sequence(), 3);
        assert_eq!(store.retrieve_latest("s", "a").unwrap().unwrap().version, 3);
        store.store("s", "a", note(4), 4).unwrap();
    }

    let store = FileDocumentStore::open(dir.path()).unwrap();
    assert_eq!(store.sequence(), 4);
    assert_eq!(store.retrieve_latest("s", "a").unwrap().unwrap().value, note(4));
}

/// Test that a corrupted entry ends replay at the last good one.
#[test]
fn test_corrupt_entry_stops_replay() {
    let dir = tempdir().unwrap();
    let log_path = dir.path().join("commit.log");

    let first_len;
    {
        let store = FileDocumentStore::open(dir.path()).unwrap();
        store.store("s", "a", note(1), 1).unwrap();
        first_len = fs::metadata(&log_path).unwrap().len();
        store.store("s", "a", note(2), 2).unwrap();
    }

    // Flip a byte inside the second frame's body.
    let mut bytes = fs::read(&log_path).unwrap();
    let target = usize::try_from(first_len).unwrap() + 20;
    bytes[target] ^= 0xFF;
    fs::write(&log_path, &bytes).unwrap();

    let store = FileDocumentStore::open(dir.path()).unwrap();
    assert_eq!(store.sequence(), 1);
    assert_eq!(store.retrieve_latest("s", "a").unwrap().unwrap().value, note(1));
    assert_eq!(fs::metadata(&log_path).unwrap().len(), first_len);
}

/// Test that a second open of a locked directory fails.
#[test]
fn test_directory_is_locked() {
    let dir = tempdir().unwrap();
    let _store = FileDocumentStore::open(dir.path()).unwrap();
    let err = FileDocumentStore::open(dir.path()).unwrap_err();
    assert!(matches!(err, StorageError::Locked { .. }));
    assert!(!err.is_retryable());
}

/// Test that the configured entry limit refuses a batch and leaves the store usable.
#[test]
fn test_entry_limit_from_config() {
    let dir = tempdir().unwrap();
    let config = StorageConfig {
        max_entry_bytes: 512,
        ..StorageConfig::default()
    };
    let store = FileDocumentStore::open_with(dir.path(), &config).unwrap();

    let big = StoredValue {
        record_type: "note".to_string(),
        body: json!({ "text": "x".repeat(1024) }),
    };
    assert!(matches!(store.store("s", "a", big, 1), Err(StorageError::BackendError(_))));
    assert!(store.retrieve_latest("s", "a").unwrap().is_none());

    store.store("s", "a", note(1), 1).unwrap();
    assert_eq!(store.sequence(), 1);
}

/// Test a full dialectic over a store that is closed and reopened between turns.
#[test]
fn test_dialectic_survives_restart() {
    let dir = tempdir().unwrap();
    let subject = SelfModelId::new("restart");
    let cancel = CancellationToken::new();

    let dialectic_id = {
        let engine = DialecticEngine::new(
            Arc::new(FileDocumentStore::open(dir.path()).unwrap()),
            Arc::new(ScriptedCollaborator::new()),
            EngineConfig::default(),
        )
        .unwrap();
        let dialectic = engine.create_dialectic(&subject, DialecticType::Default).unwrap();
        engine
            .update(
                &subject,
                dialectic.id,
                UpdateRequest::Answer("I run every morning".into()),
                false,
                &cancel,
            )
            .unwrap();
        dialectic.id
    };

    let engine = DialecticEngine::new(
        Arc::new(FileDocumentStore::open(dir.path()).unwrap()),
        Arc::new(ScriptedCollaborator::new()),
        EngineConfig::default(),
    )
    .unwrap();

    let dialectic = engine.get_dialectic(&subject, dialectic_id).unwrap();
    assert_eq!(dialectic.version, 2);
    assert_eq!(dialectic.interactions().len(), 2);
    assert_eq!(dialectic.interactions()[0].answer(), Some("I run every morning"));
    assert!(dialectic.interactions()[1].is_pending());

    let system = engine.belief_system(&subject).unwrap();
    assert_eq!(system.version, 1);
    assert_eq!(system.beliefs().len(), 1);

    // The restored versions line up with what is on disk, so the next commit is accepted.
    let outcome = engine
        .update(
            &subject,
            dialectic_id,
            UpdateRequest::Answer("I run every morning".into()),
            false,
            &cancel,
        )
        .unwrap();
    assert_eq!(outcome.dialectic.version, 3);
    assert_eq!(outcome.belief_system.version, 2);
    assert_eq!(outcome.discrepancies.len(), 1);
}
