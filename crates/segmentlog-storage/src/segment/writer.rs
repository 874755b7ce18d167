//! Segment writer: appends encoded batches to the active segment.

use std::fs::{self, File, OpenOptions};
use std::io::Write;

use segmentlog_types::{Offset, Timestamp};

use crate::index::{IndexWriter, OffsetIndexEntry, TimeIndexEntry};
use crate::{BATCH_HEADER_SIZE, BatchHeader, CodecRegistry, Segment, StorageError};

/// Thresholds fixed for the lifetime of a writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentWriterOptions {
    /// The segment should roll once its log reaches this many bytes.
    pub max_segment_bytes: u64,
    /// Minimum log bytes written between two offset-index entries.
    pub index_interval_bytes: u64,
    /// Minimum base-timestamp advance between two time-index entries.
    pub time_index_interval_ms: u64,
}

impl Default for SegmentWriterOptions {
    fn default() -> Self {
        Self {
            max_segment_bytes: 128 * 1024 * 1024,
            index_interval_bytes: 4096,
            time_index_interval_ms: 4096,
        }
    }
}

struct WriterFiles {
    log: File,
    offset_index: IndexWriter<OffsetIndexEntry>,
    time_index: IndexWriter<TimeIndexEntry>,
}

/// Appends pre-encoded batches to one segment.
///
/// The writer never rolls by itself: the owner checks [`should_roll`] and
/// replaces the writer with one on a fresh segment.
///
/// [`should_roll`]: SegmentWriter::should_roll
pub struct SegmentWriter {
    segment: Segment,
    options: SegmentWriterOptions,
    files: Option<WriterFiles>,
    log_len: u64,
    bytes_since_last_index: u64,
    last_time_indexed: Option<Timestamp>,
}

impl SegmentWriter {
    /// Opens (creating if needed) the segment's three files for appending.
    pub fn open(segment: Segment, options: SegmentWriterOptions) -> Result<Self, StorageError> {
        if let Some(dir) = segment.log_path().parent() {
            fs::create_dir_all(dir)?;
        }

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(segment.log_path())?;
        let offset_index = IndexWriter::open(segment.index_path())?;
        let time_index = IndexWriter::<TimeIndexEntry>::open(segment.time_index_path())?;

        let log_len = log.metadata()?.len();
        let last_time_indexed = time_index.last().map(|e| e.timestamp);

        tracing::debug!(
            base_offset = %segment.base_offset(),
            log_len,
            "opened segment writer"
        );

        Ok(Self {
            segment,
            options,
            files: Some(WriterFiles {
                log,
                offset_index,
                time_index,
            }),
            log_len,
            bytes_since_last_index: 0,
            last_time_indexed,
        })
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    pub fn options(&self) -> &SegmentWriterOptions {
        &self.options
    }

    /// Current length of the log file in bytes.
    pub fn log_len(&self) -> u64 {
        self.log_len
    }

    /// Returns true once the log has reached `max_segment_bytes`.
    pub fn should_roll(&self) -> bool {
        self.log_len >= self.options.max_segment_bytes
    }

    pub fn is_closed(&self) -> bool {
        self.files.is_none()
    }

    /// Appends one encoded batch covering `[base_offset, last_offset]`.
    ///
    /// The bytes are flushed to durable storage before index entries are
    /// written, so an index entry never points past durable data. Returns
    /// the log position the batch was written at.
    ///
    /// An offset-index entry is written once `index_interval_bytes` have
    /// accumulated since the previous one; a time-index entry is written for
    /// the first batch and whenever the base timestamp has advanced past the
    /// last indexed one by at least `time_index_interval_ms`.
    ///
    /// On a failed write the log is cut back to its previous length, so a
    /// rejected batch leaves nothing behind.
    pub fn append(
        &mut self,
        batch: &[u8],
        base_offset: Offset,
        last_offset: Offset,
    ) -> Result<u64, StorageError> {
        let header = BatchHeader::parse(batch)?;
        if header.total_len() != batch.len()
            || header.base_offset != base_offset
            || header.last_offset != last_offset
        {
            return Err(StorageError::corrupt(format!(
                "batch bytes describe [{}, {}] in {} bytes, caller declared [{base_offset}, {last_offset}] in {}",
                header.base_offset,
                header.last_offset,
                header.total_len(),
                batch.len()
            )));
        }
        if base_offset < self.segment.base_offset() {
            return Err(StorageError::OutOfRange {
                offset: base_offset,
                base_offset: self.segment.base_offset(),
            });
        }
        let empty = header.is_empty(&batch[BATCH_HEADER_SIZE..], &CodecRegistry::default())?;

        let files = self.files.as_mut().ok_or(StorageError::Closed)?;
        let position = self.log_len;

        if let Err(e) = files.log.write_all(batch).and_then(|()| files.log.sync_data()) {
            tracing::warn!(
                base_offset = %base_offset,
                position,
                error = %e,
                "batch write failed, rolling log back"
            );
            if let Err(rollback) = files.log.set_len(position) {
                tracing::error!(
                    position,
                    error = %rollback,
                    "failed to roll back partial batch"
                );
            }
            return Err(e.into());
        }

        self.log_len += batch.len() as u64;
        self.bytes_since_last_index += batch.len() as u64;

        // The batch is durable from here on. Index entries are hints, so a
        // failed index write is logged rather than failing the append.
        if self.bytes_since_last_index >= self.options.index_interval_bytes {
            let entry = OffsetIndexEntry {
                relative_offset: base_offset.relative_to(self.segment.base_offset()),
                position,
            };
            match files.offset_index.append(entry) {
                Ok(()) => self.bytes_since_last_index = 0,
                Err(e) => tracing::warn!(
                    base_offset = %base_offset,
                    error = %e,
                    "failed to write offset index entry"
                ),
            }
        }

        let timestamp = header.base_timestamp;
        // Keys stay strictly increasing: a floor search over equal keys could
        // land past earlier batches carrying the same timestamp.
        let due = self.last_time_indexed.is_none_or(|last| {
            timestamp > last && timestamp.saturating_since(last) >= self.options.time_index_interval_ms
        });
        if due {
            match files.time_index.append(TimeIndexEntry {
                timestamp,
                position,
            }) {
                Ok(()) => self.last_time_indexed = Some(timestamp),
                Err(e) => tracing::warn!(
                    base_offset = %base_offset,
                    error = %e,
                    "failed to write time index entry"
                ),
            }
        }

        if !empty {
            self.segment.set_next_offset(last_offset.next());
        }

        debug_assert_eq!(self.log_len, position + batch.len() as u64);
        Ok(position)
    }

    /// Flushes and closes all three files. Safe to call more than once.
    pub fn close(&mut self) -> Result<(), StorageError> {
        let Some(files) = self.files.take() else {
            return Ok(());
        };

        files.log.sync_all()?;
        files.offset_index.sync()?;
        files.time_index.sync()?;

        tracing::debug!(
            base_offset = %self.segment.base_offset(),
            next_offset = %self.segment.next_offset(),
            log_len = self.log_len,
            "closed segment writer"
        );
        Ok(())
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(
                base_offset = %self.segment.base_offset(),
                error = %e,
                "failed to close segment writer during drop"
            );
        }
    }
}

impl std::fmt::Debug for SegmentWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentWriter")
            .field("segment", &self.segment)
            .field("log_len", &self.log_len)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
