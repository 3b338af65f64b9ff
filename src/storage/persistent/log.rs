//! Append-only commit log.
//!
//! Each committed batch is one `Batch` frame, numbered from 1 without gaps.
//! On open the log is scanned; a torn, corrupt or out-of-sequence tail is cut
//! off so later appends land after the last good frame. An append that fails
//! part way is rolled back to the last acknowledged length before the error
//! is returned, so a failed commit never leaves bytes for the next one to
//! land behind.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::config::StorageConfig;
use crate::storage::traits::{StorageError, StoreOp};

use super::codec::{self, FrameCodec, FrameError, FrameKind};

/// Body of a `Batch` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub ops: Vec<StoreOp>,
}

/// Destination of appended frames.
pub trait LogSink: Write + Send + fmt::Debug {
    fn sync(&mut self) -> io::Result<()>;

    /// Cuts the sink back to `len` bytes and positions the next write there.
    fn rewind_to(&mut self, len: u64) -> io::Result<()>;
}

impl LogSink for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }

    fn rewind_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.seek(SeekFrom::Start(len))?;
        Ok(())
    }
}

#[derive(Debug)]
struct Tail {
    sink: Box<dyn LogSink>,
    sequence: u64,
    /// Length of the log through the last acknowledged frame.
    committed_len: u64,
    /// Set when a failed append could not be rolled back.
    poisoned: Option<String>,
}

#[derive(Debug)]
pub struct CommitLog {
    codec: FrameCodec,
    sync_on_write: bool,
    tail: Mutex<Tail>,
}

fn backend(context: &str, e: impl fmt::Display) -> StorageError {
    StorageError::BackendError(format!("{context}: {e}"))
}

impl CommitLog {
    /// Opens or creates the log at `path` and returns it with every intact
    /// entry, oldest first, paired with its sequence number.
    ///
    /// # Errors
    ///
    /// `StorageError::BackendError` for I/O failures or a file that is not a
    /// commit log.
    pub fn open(path: &Path, config: &StorageConfig) -> Result<(Self, Vec<(u64, LogEntry)>), StorageError> {
        let codec = FrameCodec::new(config.max_entry_bytes);
        let existing_len = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if existing_len < codec::HEADER_LEN {
            let mut file = File::create(path).map_err(|e| backend("create commit log", e))?;
            codec::write_header(&mut file).map_err(|e| backend("write commit log header", e))?;
            file.sync_all().map_err(|e| backend("sync commit log", e))?;
        }

        let (entries, valid_len) = scan(path, &codec)?;

        let mut file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| backend("open commit log", e))?;
        let file_len = file.metadata().map_err(|e| backend("stat commit log", e))?.len();
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                dropped_bytes = file_len - valid_len,
                recovered = entries.len(),
                "Commit log has a damaged tail; truncating"
            );
            file.set_len(valid_len).map_err(|e| backend("truncate commit log", e))?;
            file.sync_all().map_err(|e| backend("sync commit log", e))?;
        }
        file.seek(SeekFrom::Start(valid_len))
            .map_err(|e| backend("seek commit log", e))?;

        let sequence = entries.last().map_or(0, |(seq, _)| *seq);
        let log = Self::with_sink(Box::new(file), codec, config.sync_on_write, sequence, valid_len);
        Ok((log, entries))
    }

    fn with_sink(
        sink: Box<dyn LogSink>,
        codec: FrameCodec,
        sync_on_write: bool,
        sequence: u64,
        committed_len: u64,
    ) -> Self {
        Self {
            codec,
            sync_on_write,
            tail: Mutex::new(Tail {
                sink,
                sequence,
                committed_len,
                poisoned: None,
            }),
        }
    }

    /// Appends one batch and returns its sequence number.
    ///
    /// # Errors
    ///
    /// `StorageError::BackendError` if the batch is too large, the write or
    /// sync fails, or an earlier failure could not be rolled back.
    pub fn append(&self, ops: &[StoreOp]) -> Result<u64, StorageError> {
        let mut tail = self
            .tail
            .lock()
            .map_err(|_| StorageError::BackendError("poisoned lock: commit_log.append".into()))?;
        if let Some(reason) = &tail.poisoned {
            return Err(backend("commit log unusable after failed rollback", reason));
        }

        let sequence = tail.sequence + 1;
        let entry = LogEntry {
            timestamp: Utc::now(),
            ops: ops.to_vec(),
        };
        let frame = self
            .codec
            .encode(FrameKind::Batch, sequence, &entry)
            .map_err(|e| backend("encode batch", e))?;

        if let Err(e) = write_frame(tail.sink.as_mut(), &frame, self.sync_on_write) {
            let committed_len = tail.committed_len;
            match tail.sink.rewind_to(committed_len) {
                Ok(()) => warn!(sequence, committed_len, error = %e, "Commit log append failed; rolled back"),
                Err(rollback) => {
                    error!(
                        sequence,
                        committed_len,
                        error = %e,
                        rollback_error = %rollback,
                        "Commit log rollback failed; refusing further appends"
                    );
                    tail.poisoned = Some(rollback.to_string());
                }
            }
            return Err(backend("append commit log", e));
        }

        tail.sequence = sequence;
        tail.committed_len += frame.len() as u64;
        Ok(sequence)
    }

    /// Sequence number of the last appended entry.
    #[must_use]
    pub fn current_sequence(&self) -> u64 {
        self.tail.lock().map_or(0, |tail| tail.sequence)
    }
}

fn write_frame(sink: &mut dyn LogSink, frame: &[u8], sync: bool) -> io::Result<()> {
    sink.write_all(frame)?;
    sink.flush()?;
    if sync {
        sink.sync()?;
    }
    Ok(())
}

/// Reads frames until the end or the first bad one; returns the entries and
/// the byte length of the intact prefix.
fn scan(path: &Path, codec: &FrameCodec) -> Result<(Vec<(u64, LogEntry)>, u64), StorageError> {
    let file = File::open(path).map_err(|e| backend("open commit log", e))?;
    let file_len = file.metadata().map_err(|e| backend("stat commit log", e))?.len();
    let mut reader = BufReader::new(file);
    codec::read_header(&mut reader).map_err(|e| backend("read commit log header", e))?;

    let mut entries: Vec<(u64, LogEntry)> = Vec::new();
    let mut valid_len = codec::HEADER_LEN;
    while valid_len < file_len {
        let expected = entries.last().map_or(1, |(seq, _)| seq + 1);
        match codec.decode::<LogEntry>(&mut reader) {
            Ok(frame) if frame.sequence == expected => match frame.kind {
                FrameKind::Batch => {
                    entries.push((frame.sequence, frame.body));
                    valid_len = reader.stream_position().map_err(|e| backend("scan commit log", e))?;
                }
            },
            Ok(frame) => {
                warn!(
                    path = %path.display(),
                    expected,
                    found = frame.sequence,
                    "Commit log sequence gap"
                );
                break;
            }
            Err(FrameError::Truncated) => break,
            Err(FrameError::Io(e)) => return Err(backend("scan commit log", e)),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    after_sequence = expected - 1,
                    error = %e,
                    "Commit log frame failed verification"
                );
                break;
            }
        }
    }
    Ok((entries, valid_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::traits::StoredValue;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex as StdMutex};
    use tempfile::tempdir;

    fn op(key: &str, version: u64) -> StoreOp {
        StoreOp::new(
            "scope",
            key,
            StoredValue {
                record_type: "doc".to_string(),
                body: serde_json::json!({ "v": version }),
            },
            version,
        )
    }

    fn config(sync_on_write: bool) -> StorageConfig {
        StorageConfig {
            sync_on_write,
            ..StorageConfig::default()
        }
    }

    /// Failures armed for the next matching call; each fires once.
    #[derive(Debug, Default, Clone, Copy)]
    struct Faults {
        /// Accept this many bytes of the next write, then fail.
        write_after: Option<usize>,
        sync: bool,
        rewind: bool,
    }

    /// In-memory sink that fails on demand.
    #[derive(Debug, Clone)]
    struct FaultySink {
        bytes: Arc<StdMutex<Vec<u8>>>,
        faults: Arc<StdMutex<Faults>>,
    }

    impl FaultySink {
        fn new() -> Self {
            let mut header = Vec::new();
            codec::write_header(&mut header).unwrap();
            Self {
                bytes: Arc::new(StdMutex::new(header)),
                faults: Arc::new(StdMutex::new(Faults::default())),
            }
        }

        fn arm(&self, faults: Faults) {
            *self.faults.lock().unwrap() = faults;
        }

        fn snapshot(&self) -> Vec<u8> {
            self.bytes.lock().unwrap().clone()
        }
    }

    impl Write for FaultySink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let cut = self.faults.lock().unwrap().write_after.take();
            if let Some(n) = cut {
                self.bytes.lock().unwrap().extend_from_slice(&buf[..n.min(buf.len())]);
                return Err(io::Error::other("disk full"));
            }
            self.bytes.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogSink for FaultySink {
        fn sync(&mut self) -> io::Result<()> {
            if std::mem::take(&mut self.faults.lock().unwrap().sync) {
                return Err(io::Error::other("fsync failed"));
            }
            Ok(())
        }

        fn rewind_to(&mut self, len: u64) -> io::Result<()> {
            if std::mem::take(&mut self.faults.lock().unwrap().rewind) {
                return Err(io::Error::other("ftruncate failed"));
            }
            self.bytes.lock().unwrap().truncate(usize::try_from(len).unwrap());
            Ok(())
        }
    }

    fn faulty_log(sink: &FaultySink) -> CommitLog {
        let codec = FrameCodec::new(StorageConfig::default().max_entry_bytes);
        CommitLog::with_sink(Box::new(sink.clone()), codec, true, 0, codec::HEADER_LEN)
    }

    fn sequences(bytes: Vec<u8>) -> Vec<u64> {
        let codec = FrameCodec::new(StorageConfig::default().max_entry_bytes);
        let mut reader = Cursor::new(bytes);
        codec::read_header(&mut reader).unwrap();
        let mut out = Vec::new();
        while let Ok(frame) = codec.decode::<LogEntry>(&mut reader) {
            out.push(frame.sequence);
        }
        out
    }

    #[test]
    fn test_append_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("commit.log");
        {
            let (log, entries) = CommitLog::open(&path, &config(false)).unwrap();
            assert!(entries.is_empty());
            log.append(&[op("a", 1), op("b", 1)]).unwrap();
            log.append(&[op("a", 2)]).unwrap();
            assert_eq!(log.current_sequence(), 2);
        }

        let (log, entries) = CommitLog::open(&path, &config(false)).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].1.ops.len(), 2);
        assert_eq!(entries[1].0, 2);
        assert_eq!(log.current_sequence(), 2);
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("commit.log");
        {
            let (log, _) = CommitLog::open(&path, &config(true)).unwrap();
            log.append(&[op("a", 1)]).unwrap();
            log.append(&[op("a", 2)]).unwrap();
        }
        let len = std::fs::metadata(&path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(len - 3)
            .unwrap();

        {
            let (log, entries) = CommitLog::open(&path, &config(true)).unwrap();
            assert_eq!(entries.len(), 1);
            assert_eq!(log.current_sequence(), 1);
            log.append(&[op("a", 3)]).unwrap();
        }

        let (_, entries) = CommitLog::open(&path, &config(true)).unwrap();
        let versions: Vec<_> = entries.iter().map(|(_, e)| e.ops[0].version).collect();
        assert_eq!(versions, [1, 3]);
        let sequences: Vec<_> = entries.iter().map(|(seq, _)| *seq).collect();
        assert_eq!(sequences, [1, 2]);
    }

    #[test]
    fn test_partial_write_is_rolled_back() {
        let sink = FaultySink::new();
        let log = faulty_log(&sink);
        log.append(&[op("a", 1)]).unwrap();
        let acknowledged = sink.snapshot();

        sink.arm(Faults {
            write_after: Some(10),
            ..Faults::default()
        });
        assert!(log.append(&[op("a", 2)]).is_err());
        assert_eq!(sink.snapshot(), acknowledged);
        assert_eq!(log.current_sequence(), 1);

        assert_eq!(log.append(&[op("a", 3)]).unwrap(), 2);
        assert_eq!(sequences(sink.snapshot()), [1, 2]);
    }

    #[test]
    fn test_failed_sync_does_not_reuse_sequence() {
        let sink = FaultySink::new();
        let log = faulty_log(&sink);
        log.append(&[op("a", 1)]).unwrap();

        sink.arm(Faults {
            sync: true,
            ..Faults::default()
        });
        assert!(log.append(&[op("a", 2)]).is_err());
        assert_eq!(sequences(sink.snapshot()), [1]);

        assert_eq!(log.append(&[op("a", 3)]).unwrap(), 2);
        assert_eq!(sequences(sink.snapshot()), [1, 2]);
    }

    #[test]
    fn test_failed_rollback_refuses_appends() {
        let sink = FaultySink::new();
        let log = faulty_log(&sink);

        // The write fails, then so does the truncate that should undo it.
        sink.arm(Faults {
            write_after: Some(4),
            sync: false,
            rewind: true,
        });
        assert!(log.append(&[op("a", 1)]).is_err());

        let err = log.append(&[op("a", 1)]).unwrap_err();
        assert!(err.to_string().contains("failed rollback"));
        assert_eq!(log.current_sequence(), 0);
    }

    #[test]
    fn test_oversized_batch_is_refused() {
        let dir = tempdir().unwrap();
        let small = StorageConfig {
            max_entry_bytes: 64,
            ..StorageConfig::default()
        };
        let (log, _) = CommitLog::open(&dir.path().join("commit.log"), &small).unwrap();
        let err = log.append(&[op("a", 1), op("b", 1), op("c", 1)]).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
        assert_eq!(log.current_sequence(), 0);
    }
}
