//! Sparse offset and time indexes.
//!
//! Each segment carries two append-only index files next to its log:
//!
//! ```text
//! 00000000000000000000.log        <- batches
//! 00000000000000000000.index      <- relative offset -> log position
//! 00000000000000000000.timeindex  <- base timestamp  -> log position
//! ```
//!
//! Both files are a flat array of fixed-width entries:
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  Offset  │  Size  │  Field           │
//! ├──────────────────────────────────────┤
//! │  16*i    │  8     │  key (u64 BE)    │
//! │  16*i+8  │  8     │  position (u64)  │
//! └──────────────────────────────────────┘
//! ```
//!
//! Entries are appended in log order, so keys are non-decreasing and the
//! `i`-th entry lives at byte `16 * i`. Indexes are sparse: a lookup finds a
//! position at or before the target, and the reader scans forward from there.
//! A trailing partial entry (torn write) is ignored.

use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use segmentlog_types::Timestamp;

use crate::StorageError;
use crate::file::{read_exact_at, read_full_at};
use crate::search::search;

/// Size of one index entry: key(8) + position(8).
pub const INDEX_ENTRY_SIZE: usize = 16;

/// A fixed-width `(key, position)` index entry.
pub trait IndexEntry: Copy + Debug + PartialEq {
    fn from_parts(key: u64, position: u64) -> Self;

    /// The sort key of the entry.
    fn key(&self) -> u64;

    /// Byte position in the log file.
    fn position(&self) -> u64;

    fn to_bytes(&self) -> [u8; INDEX_ENTRY_SIZE] {
        let mut bytes = [0u8; INDEX_ENTRY_SIZE];
        bytes[..8].copy_from_slice(&self.key().to_be_bytes());
        bytes[8..].copy_from_slice(&self.position().to_be_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8; INDEX_ENTRY_SIZE]) -> Self {
        let mut key = [0u8; 8];
        let mut position = [0u8; 8];
        key.copy_from_slice(&bytes[..8]);
        position.copy_from_slice(&bytes[8..]);
        Self::from_parts(u64::from_be_bytes(key), u64::from_be_bytes(position))
    }
}

/// Maps an offset relative to the segment's base to a log position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetIndexEntry {
    pub relative_offset: u64,
    pub position: u64,
}

impl IndexEntry for OffsetIndexEntry {
    fn from_parts(key: u64, position: u64) -> Self {
        Self {
            relative_offset: key,
            position,
        }
    }

    fn key(&self) -> u64 {
        self.relative_offset
    }

    fn position(&self) -> u64 {
        self.position
    }
}

/// Maps a batch base timestamp to a log position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeIndexEntry {
    pub timestamp: Timestamp,
    pub position: u64,
}

impl IndexEntry for TimeIndexEntry {
    fn from_parts(key: u64, position: u64) -> Self {
        Self {
            timestamp: Timestamp::from_millis(key),
            position,
        }
    }

    fn key(&self) -> u64 {
        self.timestamp.as_millis()
    }

    fn position(&self) -> u64 {
        self.position
    }
}

/// Read-only view of an index file that may still be growing.
///
/// The entry count is taken from the file length on every lookup, so
/// entries appended by a concurrent writer become visible without reopening.
#[derive(Debug)]
pub struct IndexFile<E> {
    file: File,
    path: PathBuf,
    _entry: PhantomData<E>,
}

impl<E: IndexEntry> IndexFile<E> {
    /// Opens `path` read-only, or returns `None` if it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Option<Self>, StorageError> {
        let path = path.as_ref();
        match File::open(path) {
            Ok(file) => Ok(Some(Self {
                file,
                path: path.to_path_buf(),
                _entry: PhantomData,
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of complete entries currently in the file.
    pub fn entry_count(&self) -> Result<u64, StorageError> {
        Ok(self.file.metadata()?.len() / INDEX_ENTRY_SIZE as u64)
    }

    /// Reads the `i`-th entry.
    pub fn entry_at(&self, i: u64) -> Result<E, StorageError> {
        let mut bytes = [0u8; INDEX_ENTRY_SIZE];
        read_exact_at(&self.file, &mut bytes, i * INDEX_ENTRY_SIZE as u64)?;
        Ok(E::from_bytes(&bytes))
    }

    /// Finds the entry with the greatest key `<= target`.
    pub fn lookup(&self, target: u64) -> Result<Option<E>, StorageError> {
        search(
            self.entry_count()?,
            |i| self.entry_at(i),
            E::key,
            target,
        )
    }

    /// Reads every complete entry.
    pub fn entries(&self) -> Result<Vec<E>, StorageError> {
        read_entries(&self.file)
    }
}

/// Append side of an index file, owned by the segment writer.
#[derive(Debug)]
pub struct IndexWriter<E> {
    file: File,
    entries: u64,
    last: Option<E>,
}

impl<E: IndexEntry> IndexWriter<E> {
    /// Opens or creates `path` for appending.
    ///
    /// A trailing partial entry left by a torn write is cut off first so new
    /// entries stay aligned.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path.as_ref())?;

        let len = file.metadata()?.len();
        let aligned = len - len % INDEX_ENTRY_SIZE as u64;
        if aligned != len {
            tracing::warn!(
                path = %path.as_ref().display(),
                len,
                aligned,
                "dropping partial index entry"
            );
            file.set_len(aligned)?;
        }

        let entries = aligned / INDEX_ENTRY_SIZE as u64;
        let last = if entries == 0 {
            None
        } else {
            let mut bytes = [0u8; INDEX_ENTRY_SIZE];
            read_exact_at(&file, &mut bytes, aligned - INDEX_ENTRY_SIZE as u64)?;
            Some(E::from_bytes(&bytes))
        };

        Ok(Self {
            file,
            entries,
            last,
        })
    }

    /// Appends one entry.
    ///
    /// # Panics
    ///
    /// Debug builds panic if the entry's key or position is below the last
    /// entry's (entries must stay sorted for binary search).
    pub fn append(&mut self, entry: E) -> Result<(), StorageError> {
        debug_assert!(
            self.last
                .is_none_or(|last| entry.key() >= last.key() && entry.position() > last.position()),
            "index entry {entry:?} out of order after {:?}",
            self.last
        );

        self.file.write_all(&entry.to_bytes())?;
        self.entries += 1;
        self.last = Some(entry);
        Ok(())
    }

    /// The most recently written entry.
    pub fn last(&self) -> Option<E> {
        self.last
    }

    pub fn len(&self) -> u64 {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn sync(&self) -> Result<(), StorageError> {
        self.file.sync_data()?;
        Ok(())
    }
}

fn read_entries<E: IndexEntry>(file: &File) -> Result<Vec<E>, StorageError> {
    let len = file.metadata()?.len() as usize;
    let mut raw = vec![0u8; len - len % INDEX_ENTRY_SIZE];
    let filled = read_full_at(file, &mut raw, 0)?;
    raw.truncate(filled - filled % INDEX_ENTRY_SIZE);

    Ok(raw
        .chunks_exact(INDEX_ENTRY_SIZE)
        .map(|chunk| {
            let mut bytes = [0u8; INDEX_ENTRY_SIZE];
            bytes.copy_from_slice(chunk);
            E::from_bytes(&bytes)
        })
        .collect())
}

/// Removes entries pointing at or beyond `log_len`.
///
/// Used after recovery truncates a torn log tail. Returns the number of
/// entries removed; a missing file removes nothing.
pub fn truncate_entries_beyond<E: IndexEntry>(
    path: impl AsRef<Path>,
    log_len: u64,
) -> Result<u64, StorageError> {
    let file = match OpenOptions::new().read(true).write(true).open(path.as_ref()) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let entries: Vec<E> = read_entries(&file)?;
    let keep = entries.iter().take_while(|e| e.position() < log_len).count();
    let removed = (entries.len() - keep) as u64;

    let new_len = (keep * INDEX_ENTRY_SIZE) as u64;
    if new_len != file.metadata()?.len() {
        file.set_len(new_len)?;
        file.sync_data()?;
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_bytes_are_key_then_position_big_endian() {
        let entry = OffsetIndexEntry {
            relative_offset: 3,
            position: 0x0100,
        };
        let bytes = entry.to_bytes();
        assert_eq!(&bytes[..8], &3u64.to_be_bytes());
        assert_eq!(&bytes[8..], &0x0100u64.to_be_bytes());
        assert_eq!(OffsetIndexEntry::from_bytes(&bytes), entry);
    }

    #[test]
    fn missing_index_opens_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let index = IndexFile::<OffsetIndexEntry>::open(dir.path().join("nope.index")).unwrap();
        assert!(index.is_none());
    }

    #[test]
    fn writer_and_reader_share_a_growing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.index");

        let mut writer = IndexWriter::<OffsetIndexEntry>::open(&path).unwrap();
        let reader = IndexFile::<OffsetIndexEntry>::open(&path).unwrap().unwrap();
        assert_eq!(reader.lookup(10).unwrap(), None);

        for (key, position) in [(10, 100), (20, 200), (30, 300)] {
            writer
                .append(OffsetIndexEntry {
                    relative_offset: key,
                    position,
                })
                .unwrap();
        }

        assert_eq!(reader.entry_count().unwrap(), 3);
        assert_eq!(reader.lookup(25).unwrap().map(|e| e.position), Some(200));
        assert_eq!(reader.lookup(9).unwrap(), None);
    }

    #[test]
    fn reopened_writer_remembers_last_entry_and_drops_partial_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.timeindex");

        {
            let mut writer = IndexWriter::<TimeIndexEntry>::open(&path).unwrap();
            writer
                .append(TimeIndexEntry {
                    timestamp: Timestamp::from_millis(1_000),
                    position: 0,
                })
                .unwrap();
        }
        // Simulate a torn second entry.
        OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(&[1, 2, 3])
            .unwrap();

        let writer = IndexWriter::<TimeIndexEntry>::open(&path).unwrap();
        assert_eq!(writer.len(), 1);
        assert_eq!(
            writer.last().map(|e| e.timestamp),
            Some(Timestamp::from_millis(1_000))
        );
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 16);
    }

    #[test]
    fn truncation_drops_entries_past_log_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.index");
        let mut writer = IndexWriter::<OffsetIndexEntry>::open(&path).unwrap();
        for (key, position) in [(0, 0), (5, 4_096), (9, 8_192)] {
            writer
                .append(OffsetIndexEntry {
                    relative_offset: key,
                    position,
                })
                .unwrap();
        }
        drop(writer);

        let removed = truncate_entries_beyond::<OffsetIndexEntry>(&path, 5_000).unwrap();
        assert_eq!(removed, 1);

        let reader = IndexFile::<OffsetIndexEntry>::open(&path).unwrap().unwrap();
        let positions: Vec<u64> = reader.entries().unwrap().iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![0, 4_096]);
    }
}
