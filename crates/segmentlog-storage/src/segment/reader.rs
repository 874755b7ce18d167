//! Segment reader: index-accelerated seek, then forward scan.
//!
//! A reader may be opened on the active segment while its writer keeps
//! appending. Bytes past the last complete batch are a write in progress,
//! so every scan treats a short read at the tail as "no more data yet"
//! rather than corruption.

use std::fs::File;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use segmentlog_types::{Offset, Timestamp};

use crate::file::read_full_at;
use crate::index::{IndexEntry, IndexFile, OffsetIndexEntry, TimeIndexEntry};
use crate::{BATCH_HEADER_SIZE, BatchHeader, CodecRegistry, RecordBatch, Segment, StorageError};

/// A checksum-verified batch that has not been decoded.
#[derive(Debug, Clone)]
pub struct RawBatch {
    /// Log position of the batch's first byte.
    pub position: u64,
    pub header: BatchHeader,
    /// The full encoded batch, header included.
    pub bytes: Bytes,
}

impl RawBatch {
    pub fn decode(&self, codecs: &CodecRegistry) -> Result<RecordBatch, StorageError> {
        RecordBatch::decode(&self.bytes, codecs).map(|(batch, _)| batch)
    }

    /// Returns true if the batch carries no records.
    pub fn is_empty(&self, codecs: &CodecRegistry) -> Result<bool, StorageError> {
        self.header.is_empty(&self.bytes[BATCH_HEADER_SIZE..], codecs)
    }

    /// Number of offsets the batch occupies.
    pub fn record_count(&self, codecs: &CodecRegistry) -> Result<u64, StorageError> {
        if self.is_empty(codecs)? {
            return Ok(0);
        }
        Ok(self.header.last_offset.relative_to(self.header.base_offset) + 1)
    }
}

/// Forward-only cursor over the batches of a log file.
///
/// Owns its own file handle and a read-ahead window, so many scanners can
/// run against the same segment independently.
#[derive(Debug)]
pub struct BatchScanner {
    file: File,
    position: u64,
    window: Vec<u8>,
    window_start: u64,
    read_ahead: usize,
}

impl BatchScanner {
    fn new(file: File, position: u64, read_ahead: usize) -> Self {
        Self {
            file,
            position,
            window: Vec::new(),
            window_start: 0,
            read_ahead: read_ahead.max(BATCH_HEADER_SIZE),
        }
    }

    /// Log position of the next batch to be read.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns up to `len` bytes at `position`, refilling the window when
    /// the request is not already buffered.
    fn bytes_at(&mut self, position: u64, len: usize) -> Result<&[u8], StorageError> {
        let window_end = self.window_start + self.window.len() as u64;
        if position < self.window_start || position + len as u64 > window_end {
            self.window.resize(len.max(self.read_ahead), 0);
            let filled = read_full_at(&self.file, &mut self.window, position)?;
            self.window.truncate(filled);
            self.window_start = position;
        }

        let from = (position - self.window_start) as usize;
        let available = (self.window.len() - from).min(len);
        Ok(&self.window[from..from + available])
    }

    /// Reads the next batch without decoding its records.
    ///
    /// Returns `Ok(None)` at a clean end of file and
    /// [`StorageError::Truncated`] when the file ends inside a batch.
    pub fn next_raw(&mut self) -> Result<Option<RawBatch>, StorageError> {
        let head = self.bytes_at(self.position, BATCH_HEADER_SIZE)?;
        if head.is_empty() {
            return Ok(None);
        }
        let header = BatchHeader::parse(head)?;

        let total = header.total_len();
        let data = self.bytes_at(self.position, total)?;
        if data.len() < total {
            return Err(StorageError::Truncated {
                needed: total,
                available: data.len(),
            });
        }
        let bytes = Bytes::copy_from_slice(data);
        header.verify_checksum(&bytes[BATCH_HEADER_SIZE..])?;

        let raw = RawBatch {
            position: self.position,
            header,
            bytes,
        };
        self.position += total as u64;
        Ok(Some(raw))
    }
}

#[derive(Debug, Clone, Copy)]
enum BatchFilter {
    /// Batches intersecting `[start, end)`.
    Range { start: Offset, end: Offset },
    /// Batches whose base timestamp is at or after the bound.
    FromTimestamp(Timestamp),
}

/// Lazy sequence of batches from one segment.
///
/// Stops at the end of readable data: end of file, a batch still being
/// written, or the first corrupt batch (logged).
#[derive(Debug)]
pub struct SegmentBatches {
    scanner: BatchScanner,
    codecs: CodecRegistry,
    filter: BatchFilter,
    base_offset: Offset,
    done: bool,
}

impl SegmentBatches {
    fn stop(&mut self, error: Option<StorageError>) {
        if let Some(e) = error {
            if !e.is_truncation() {
                tracing::warn!(
                    segment = %self.base_offset,
                    position = self.scanner.position(),
                    error = %e,
                    "stopping segment scan at unreadable batch"
                );
            }
        }
        self.done = true;
    }
}

impl Iterator for SegmentBatches {
    type Item = RecordBatch;

    fn next(&mut self) -> Option<RecordBatch> {
        while !self.done {
            let raw = match self.scanner.next_raw() {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    self.stop(None);
                    break;
                }
                Err(e) => {
                    self.stop(Some(e));
                    break;
                }
            };

            match self.filter {
                BatchFilter::Range { start, end } => {
                    if raw.header.base_offset >= end {
                        self.stop(None);
                        break;
                    }
                    if raw.header.last_offset < start {
                        continue;
                    }
                }
                BatchFilter::FromTimestamp(ts) => {
                    if raw.header.base_timestamp < ts {
                        continue;
                    }
                }
            }

            match raw.decode(&self.codecs) {
                Ok(batch) => return Some(batch),
                Err(e) => self.stop(Some(e)),
            }
        }
        None
    }
}

/// Outcome of scanning a segment from its start.
#[derive(Debug)]
pub struct SegmentRecovery {
    /// One past the last offset of the last valid batch, or the segment base.
    pub next_offset: Offset,
    /// Length of the log up to the end of the last valid batch.
    pub valid_len: u64,
    /// Length of the log file as found.
    pub log_len: u64,
    pub batches: u64,
    /// Why the scan stopped before `log_len`, if it did.
    pub stop_reason: Option<StorageError>,
}

impl SegmentRecovery {
    /// Returns true if bytes past the last valid batch must be discarded.
    pub fn has_invalid_tail(&self) -> bool {
        self.valid_len < self.log_len
    }
}

struct ReaderFiles {
    log: File,
    offset_index: Option<IndexFile<OffsetIndexEntry>>,
    time_index: Option<IndexFile<TimeIndexEntry>>,
}

/// Read-only access to one segment, sealed or active.
///
/// Methods take `&self`; a reader is shared behind an `Arc` by every
/// consumer of the topic.
pub struct SegmentReader {
    segment: Segment,
    codecs: CodecRegistry,
    read_buffer_size: usize,
    files: Mutex<Option<ReaderFiles>>,
}

impl SegmentReader {
    /// Opens the segment's log read-only, plus whichever index files exist.
    pub fn open(
        segment: Segment,
        codecs: CodecRegistry,
        read_buffer_size: usize,
    ) -> Result<Self, StorageError> {
        let log = File::open(segment.log_path())?;
        let offset_index = IndexFile::open(segment.index_path())?;
        let time_index = IndexFile::open(segment.time_index_path())?;

        tracing::debug!(
            base_offset = %segment.base_offset(),
            has_offset_index = offset_index.is_some(),
            has_time_index = time_index.is_some(),
            "opened segment reader"
        );

        Ok(Self {
            segment,
            codecs,
            read_buffer_size,
            files: Mutex::new(Some(ReaderFiles {
                log,
                offset_index,
                time_index,
            })),
        })
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    pub fn base_offset(&self) -> Offset {
        self.segment.base_offset()
    }

    fn files(&self) -> MutexGuard<'_, Option<ReaderFiles>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current length of the log file.
    pub fn log_len(&self) -> Result<u64, StorageError> {
        let files = self.files();
        let files = files.as_ref().ok_or(StorageError::Closed)?;
        Ok(files.log.metadata()?.len())
    }

    /// Returns a scanner positioned at `position`.
    pub fn scanner_at(&self, position: u64) -> Result<BatchScanner, StorageError> {
        let files = self.files();
        let files = files.as_ref().ok_or(StorageError::Closed)?;
        Ok(BatchScanner::new(
            files.log.try_clone()?,
            position,
            self.read_buffer_size,
        ))
    }

    /// Log position to start scanning from for `offset`.
    fn offset_position(&self, offset: Offset) -> Result<u64, StorageError> {
        let relative = offset.relative_to(self.segment.base_offset());
        let mut files = self.files();
        let files = files.as_mut().ok_or(StorageError::Closed)?;
        lookup_position(
            &mut files.offset_index,
            self.segment.index_path(),
            relative,
        )
    }

    /// Log position to start scanning from for `timestamp`.
    fn time_position(&self, timestamp: Timestamp) -> Result<u64, StorageError> {
        let mut files = self.files();
        let files = files.as_mut().ok_or(StorageError::Closed)?;
        lookup_position(
            &mut files.time_index,
            self.segment.time_index_path(),
            timestamp.as_millis(),
        )
    }

    fn find_raw(&self, offset: Offset) -> Result<Option<RawBatch>, StorageError> {
        if offset < self.segment.base_offset() {
            return Err(StorageError::OutOfRange {
                offset,
                base_offset: self.segment.base_offset(),
            });
        }

        let mut scanner = self.scanner_at(self.offset_position(offset)?)?;
        loop {
            let raw = match scanner.next_raw() {
                Ok(Some(raw)) => raw,
                Ok(None) => return Ok(None),
                Err(e) if e.is_truncation() => return Ok(None),
                Err(e) => return Err(e),
            };

            if raw.header.contains(offset) && !raw.is_empty(&self.codecs)? {
                return Ok(Some(raw));
            }
            if raw.header.base_offset > offset {
                return Ok(None);
            }
        }
    }

    /// Reads the batch containing `offset`.
    ///
    /// Returns `Ok(None)` if no written batch holds the offset yet.
    ///
    /// # Errors
    ///
    /// - [`StorageError::OutOfRange`] if `offset` is below the segment's base offset
    /// - [`StorageError::ChecksumMismatch`] / [`StorageError::CorruptFormat`] if a
    ///   batch on the way is damaged
    pub fn read_batch(&self, offset: Offset) -> Result<Option<RecordBatch>, StorageError> {
        self.find_raw(offset)?
            .map(|raw| raw.decode(&self.codecs))
            .transpose()
    }

    /// Returns the encoded bytes of the batch containing `offset`, exactly as
    /// stored on disk.
    pub fn read_batch_bytes(&self, offset: Offset) -> Result<Option<Bytes>, StorageError> {
        Ok(self.find_raw(offset)?.map(|raw| raw.bytes))
    }

    /// Lazily yields batches intersecting `[start, end)`.
    pub fn read_range(&self, start: Offset, end: Offset) -> Result<SegmentBatches, StorageError> {
        let from = start.max(self.segment.base_offset());
        let position = self.offset_position(from)?;
        self.batches_from(position, BatchFilter::Range { start, end })
    }

    /// Lazily yields batches whose base timestamp is `>= timestamp`.
    pub fn read_from_timestamp(&self, timestamp: Timestamp) -> Result<SegmentBatches, StorageError> {
        let position = self.time_position(timestamp)?;
        self.batches_from(position, BatchFilter::FromTimestamp(timestamp))
    }

    fn batches_from(&self, position: u64, filter: BatchFilter) -> Result<SegmentBatches, StorageError> {
        Ok(SegmentBatches {
            scanner: self.scanner_at(position)?,
            codecs: self.codecs,
            filter,
            base_offset: self.segment.base_offset(),
            done: false,
        })
    }

    /// Scans the whole segment to find where valid data ends.
    pub fn recover(&self) -> Result<SegmentRecovery, StorageError> {
        let log_len = self.log_len()?;
        let mut scanner = self.scanner_at(0)?;
        let mut next_offset = self.segment.base_offset();
        let mut batches = 0;
        let mut valid_len = 0;

        let stop_reason = loop {
            match scanner.next_raw() {
                Ok(Some(raw)) => match raw.is_empty(&self.codecs) {
                    Ok(empty) => {
                        if !empty {
                            next_offset = raw.header.last_offset.next();
                        }
                        batches += 1;
                        valid_len = scanner.position();
                    }
                    Err(e) => break Some(e),
                },
                Ok(None) => break None,
                Err(StorageError::Io(e)) => return Err(StorageError::Io(e)),
                Err(e) => break Some(e),
            }
        };

        Ok(SegmentRecovery {
            next_offset,
            valid_len,
            log_len,
            batches,
            stop_reason,
        })
    }

    /// Releases the file handles. Safe to call more than once; scanners
    /// already handed out keep their own handles.
    pub fn close(&self) {
        if self.files().take().is_some() {
            tracing::debug!(base_offset = %self.segment.base_offset(), "closed segment reader");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.files().is_none()
    }
}

impl std::fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentReader")
            .field("segment", &self.segment)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Looks `target` up in an index, opening the file first if it appeared
/// after the reader was created. A missing or empty index means position 0.
fn lookup_position<E: IndexEntry>(
    slot: &mut Option<IndexFile<E>>,
    path: &Path,
    target: u64,
) -> Result<u64, StorageError> {
    if slot.is_none() {
        *slot = IndexFile::open(path)?;
    }
    match slot {
        Some(index) => Ok(index.lookup(target)?.map_or(0, |e| e.position())),
        None => Ok(0),
    }
}
