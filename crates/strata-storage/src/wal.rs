//! Strata WAL - Write-Ahead Logging
//!
//! Append-only log backing the durable point store. Every committed write
//! batch is one record, so a batch is atomic on disk: a record torn by a
//! crash fails its checksum and is dropped on recovery together with
//! everything after it.
//!
//! Record layout:
//! lsn(8) + type(1) + padding(3) + data_len(4) + data + crc32(4)
//!
//! A checkpoint rewrites the log as a single record holding the live state,
//! written to a temporary file and atomically renamed over the log.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use strata_common::{Result, StrataError};

// =============================================================================
// Constants
// =============================================================================

pub const WAL_FILE_NAME: &str = "points.wal";
const WAL_TEMP_FILE_NAME: &str = "points.wal.tmp";

/// lsn(8) + type(1) + padding(3) + data_len(4)
pub const WAL_RECORD_HEADER_SIZE: usize = 16;
const WAL_CHECKSUM_SIZE: usize = 4;

// =============================================================================
// Log Record Types
// =============================================================================

/// Log sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Lsn(pub u64);

/// Type of WAL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum LogRecordType {
    /// One committed write batch.
    Commit = 1,
    /// Full state replacing everything before it.
    Checkpoint = 2,
}

impl TryFrom<u8> for LogRecordType {
    type Error = StrataError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(LogRecordType::Commit),
            2 => Ok(LogRecordType::Checkpoint),
            other => Err(StrataError::Corruption(format!("unknown WAL record type {}", other))),
        }
    }
}

// =============================================================================
// Log Record
// =============================================================================

/// A single record in the write-ahead log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub record_type: LogRecordType,
    pub data: Bytes,
}

impl LogRecord {
    pub fn new(lsn: Lsn, record_type: LogRecordType, data: Bytes) -> Self {
        Self {
            lsn,
            record_type,
            data,
        }
    }

    /// Total encoded size of the record.
    pub fn encoded_len(&self) -> usize {
        WAL_RECORD_HEADER_SIZE + self.data.len() + WAL_CHECKSUM_SIZE
    }

    /// Serialize the record to bytes.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());

        buf.put_u64_le(self.lsn.0);
        buf.put_u8(self.record_type as u8);
        buf.put_u8(0);
        buf.put_u16_le(0);
        buf.put_u32_le(self.data.len() as u32);
        buf.put(self.data.clone());

        let checksum = crc32fast::hash(&buf);
        buf.put_u32_le(checksum);

        buf.freeze()
    }

    /// Deserialize a record from exactly its encoded bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < WAL_RECORD_HEADER_SIZE + WAL_CHECKSUM_SIZE {
            return Err(StrataError::Corruption("log record too small".to_string()));
        }

        let body_len = data.len() - WAL_CHECKSUM_SIZE;
        let stored_checksum = (&data[body_len..]).get_u32_le();
        if crc32fast::hash(&data[..body_len]) != stored_checksum {
            return Err(StrataError::Corruption("log record checksum mismatch".to_string()));
        }

        let mut buf = &data[..body_len];
        let lsn = Lsn(buf.get_u64_le());
        let record_type = LogRecordType::try_from(buf.get_u8())?;
        buf.advance(3);
        let data_len = buf.get_u32_le() as usize;

        if buf.remaining() != data_len {
            return Err(StrataError::Corruption("log record length mismatch".to_string()));
        }

        Ok(Self {
            lsn,
            record_type,
            data: Bytes::copy_from_slice(buf),
        })
    }
}

/// Length of the record starting at the front of `buffer`, if it is complete.
fn framed_len(buffer: &[u8]) -> Option<usize> {
    if buffer.len() < WAL_RECORD_HEADER_SIZE {
        return None;
    }
    let data_len = (&buffer[12..16]).get_u32_le() as usize;
    let total = WAL_RECORD_HEADER_SIZE + data_len + WAL_CHECKSUM_SIZE;
    (buffer.len() >= total).then_some(total)
}

// =============================================================================
// Write-Ahead Log
// =============================================================================

struct WalWriter {
    file: File,
    offset: u64,
    /// Set when a failed append could not be rolled back. The file may hold
    /// a partial record, so nothing appended after it would be recovered.
    failed: bool,
}

/// Single-file write-ahead log.
pub struct WriteAheadLog {
    dir: PathBuf,
    writer: Mutex<WalWriter>,
    next_lsn: AtomicU64,
    sync_on_commit: bool,
}

impl WriteAheadLog {
    /// Open the log in `dir`, returning it with every intact record.
    ///
    /// A torn or corrupt tail is truncated away so later appends follow the
    /// last good record.
    pub fn open(dir: impl AsRef<Path>, sync_on_commit: bool) -> Result<(Self, Vec<LogRecord>)> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(WAL_FILE_NAME);

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;

        let (records, valid_len) = Self::parse_records(&buffer);
        if valid_len < buffer.len() {
            tracing::warn!(
                "Truncating {} bytes of torn WAL tail at offset {}",
                buffer.len() - valid_len,
                valid_len
            );
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }

        let next_lsn = records.last().map_or(1, |r| r.lsn.0 + 1);

        let wal = Self {
            dir,
            writer: Mutex::new(WalWriter {
                file,
                offset: valid_len as u64,
                failed: false,
            }),
            next_lsn: AtomicU64::new(next_lsn),
            sync_on_commit,
        };

        Ok((wal, records))
    }

    fn parse_records(buffer: &[u8]) -> (Vec<LogRecord>, usize) {
        let mut records = Vec::new();
        let mut offset = 0;

        while let Some(len) = framed_len(&buffer[offset..]) {
            match LogRecord::from_bytes(&buffer[offset..offset + len]) {
                Ok(record) => {
                    records.push(record);
                    offset += len;
                }
                Err(e) => {
                    tracing::warn!("Failed to parse WAL record at offset {}: {}", offset, e);
                    break;
                }
            }
        }

        (records, offset)
    }

    fn path(&self) -> PathBuf {
        self.dir.join(WAL_FILE_NAME)
    }

    fn next_lsn(&self) -> Lsn {
        Lsn(self.next_lsn.fetch_add(1, Ordering::SeqCst))
    }

    /// Append a committed batch payload.
    pub fn append_commit(&self, data: Bytes) -> Result<Lsn> {
        let mut writer = self.writer.lock();
        if writer.failed {
            return Err(StrataError::Storage(
                "write-ahead log holds an unrecoverable partial record; checkpoint required".to_string(),
            ));
        }
        let record = LogRecord::new(self.next_lsn(), LogRecordType::Commit, data);
        let bytes = record.to_bytes();

        let written = writer.file.write_all(&bytes).and_then(|_| {
            if self.sync_on_commit {
                writer.file.sync_data()
            } else {
                Ok(())
            }
        });

        if let Err(e) = written {
            // Drop any partial record so the log stays parseable.
            let offset = writer.offset;
            if let Err(truncate_err) = writer.file.set_len(offset) {
                tracing::error!(
                    "Failed to truncate WAL after write error, refusing further appends: {}",
                    truncate_err
                );
                writer.failed = true;
            }
            return Err(e.into());
        }

        writer.offset += bytes.len() as u64;
        Ok(record.lsn)
    }

    /// Replace the whole log with one checkpoint record.
    pub fn checkpoint(&self, data: Bytes) -> Result<Lsn> {
        let mut writer = self.writer.lock();
        let record = LogRecord::new(self.next_lsn(), LogRecordType::Checkpoint, data);
        let bytes = record.to_bytes();

        let temp_path = self.dir.join(WAL_TEMP_FILE_NAME);
        {
            let mut temp = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&temp_path)?;
            temp.write_all(&bytes)?;
            temp.sync_all()?;
        }

        std::fs::rename(&temp_path, self.path())?;
        if let Ok(dir) = File::open(&self.dir) {
            // Persist the rename itself; not supported on every platform.
            let _ = dir.sync_all();
        }

        writer.file = OpenOptions::new().read(true).append(true).open(self.path())?;
        writer.offset = bytes.len() as u64;
        writer.failed = false;

        tracing::info!("Checkpoint written at LSN {} ({} bytes)", record.lsn.0, bytes.len());
        Ok(record.lsn)
    }

    /// Flush file contents to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.writer.lock().file.sync_all()?;
        Ok(())
    }

    /// Current size of the log in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.writer.lock().offset
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_record_roundtrip() {
        let record = LogRecord::new(Lsn(7), LogRecordType::Commit, Bytes::from_static(b"{\"a\":1}"));
        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), record.encoded_len());

        let restored = LogRecord::from_bytes(&bytes).expect("failed to deserialize log record");
        assert_eq!(restored, record);
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let record = LogRecord::new(Lsn(1), LogRecordType::Commit, Bytes::from_static(b"payload"));
        let mut bytes = record.to_bytes().to_vec();
        bytes[WAL_RECORD_HEADER_SIZE] ^= 0xFF;

        assert!(matches!(LogRecord::from_bytes(&bytes), Err(StrataError::Corruption(_))));
    }

    #[test]
    fn test_append_and_reopen() {
        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");

        {
            let (wal, records) = WriteAheadLog::open(temp_dir.path(), true).expect("failed to open WAL");
            assert!(records.is_empty());
            wal.append_commit(Bytes::from_static(b"one")).expect("append should succeed");
            wal.append_commit(Bytes::from_static(b"two")).expect("append should succeed");
        }

        let (wal, records) = WriteAheadLog::open(temp_dir.path(), true).expect("failed to reopen WAL");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].data, Bytes::from_static(b"two"));

        let lsn = wal.append_commit(Bytes::from_static(b"three")).expect("append should succeed");
        assert_eq!(lsn, Lsn(3));
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");
        {
            let (wal, _) = WriteAheadLog::open(temp_dir.path(), false).expect("failed to open WAL");
            wal.append_commit(Bytes::from_static(b"complete")).expect("append should succeed");
        }

        let path = temp_dir.path().join(WAL_FILE_NAME);
        let torn = LogRecord::new(Lsn(2), LogRecordType::Commit, Bytes::from_static(b"torn record"));
        let torn_bytes = torn.to_bytes();
        {
            let mut file = OpenOptions::new().append(true).open(&path).expect("open for append");
            file.write_all(&torn_bytes[..torn_bytes.len() - 3]).expect("write torn record");
        }

        let (wal, records) = WriteAheadLog::open(temp_dir.path(), false).expect("failed to reopen WAL");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data, Bytes::from_static(b"complete"));

        wal.append_commit(Bytes::from_static(b"after")).expect("append should succeed");
        drop(wal);

        let (_, records) = WriteAheadLog::open(temp_dir.path(), false).expect("failed to reopen WAL");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].data, Bytes::from_static(b"after"));
    }

    #[test]
    fn test_checkpoint_replaces_log() {
        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");
        let (wal, _) = WriteAheadLog::open(temp_dir.path(), true).expect("failed to open WAL");
        for _ in 0..3 {
            wal.append_commit(Bytes::from_static(b"commit")).expect("append should succeed");
        }

        wal.checkpoint(Bytes::from_static(b"state")).expect("checkpoint should succeed");
        wal.append_commit(Bytes::from_static(b"next")).expect("append should succeed");
        drop(wal);

        let (_, records) = WriteAheadLog::open(temp_dir.path(), true).expect("failed to reopen WAL");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].record_type, LogRecordType::Checkpoint);
        assert_eq!(records[0].lsn, Lsn(4));
        assert_eq!(records[1].lsn, Lsn(5));
    }

    #[test]
    fn test_failed_rollback_refuses_appends() {
        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");
        let (wal, _) = WriteAheadLog::open(temp_dir.path(), false).expect("failed to open log");
        wal.append_commit(Bytes::from_static(b"first")).expect("append should succeed");

        // A read-only handle fails both the write and the rollback truncate.
        let writable = {
            let mut writer = wal.writer.lock();
            let read_only = File::open(wal.path()).expect("open log read-only");
            std::mem::replace(&mut writer.file, read_only)
        };
        assert!(wal.append_commit(Bytes::from_static(b"second")).is_err());

        wal.writer.lock().file = writable;
        let err = wal
            .append_commit(Bytes::from_static(b"third"))
            .expect_err("append after a failed rollback should be refused");
        assert!(matches!(err, StrataError::Storage(_)));

        // A checkpoint rewrites the log from scratch and clears the failure.
        wal.checkpoint(Bytes::from_static(b"state")).expect("checkpoint should succeed");
        wal.append_commit(Bytes::from_static(b"fourth")).expect("append should succeed");
        drop(wal);

        let (_, records) = WriteAheadLog::open(temp_dir.path(), false).expect("failed to reopen log");
        let payloads: Vec<&[u8]> = records.iter().map(|r| r.data.as_ref()).collect();
        assert_eq!(payloads, vec![b"state".as_ref(), b"fourth".as_ref()]);
    }
}
