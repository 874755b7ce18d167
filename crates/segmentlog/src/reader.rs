//! Per-topic reader over every segment of the topic.
//!
//! Reads never go past the registry's high-water mark, so a record is
//! visible only once the appender's flush for it has returned. Segment
//! readers are cached by base offset; the one for the active segment is
//! replaced when the registry reports a roll.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use segmentlog_storage::{
    CodecRegistry, LogRecord, RecordBatch, Segment, SegmentBatches, SegmentReader, StorageError,
    TopicSegmentRegistry,
};
use segmentlog_types::{Offset, Timestamp, TopicName};

use crate::{CommitLogError, Result};

#[derive(Default)]
struct ReaderCache {
    sealed: HashMap<Offset, Arc<SegmentReader>>,
    active: Option<Arc<SegmentReader>>,
}

/// Reads one topic. Cheap to share behind an `Arc`.
///
/// All methods do blocking file I/O; async callers with large scans may
/// want to run them on the blocking pool.
pub struct CommitLogReader {
    registry: Arc<TopicSegmentRegistry>,
    codecs: CodecRegistry,
    read_buffer_size: usize,
    cache: Mutex<ReaderCache>,
    closed: AtomicBool,
}

impl CommitLogReader {
    pub fn new(
        registry: Arc<TopicSegmentRegistry>,
        codecs: CodecRegistry,
        read_buffer_size: usize,
    ) -> Self {
        Self {
            registry,
            codecs,
            read_buffer_size,
            cache: Mutex::new(ReaderCache::default()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn topic(&self) -> &TopicName {
        self.registry.topic()
    }

    /// One past the last readable offset.
    pub fn high_water_mark(&self) -> Offset {
        self.registry.high_water_mark()
    }

    pub fn segment_count(&self) -> usize {
        self.registry.segment_count()
    }

    fn cache(&self) -> MutexGuard<'_, ReaderCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CommitLogError::disposed(self.topic()));
        }
        Ok(())
    }

    /// Returns the cached reader for `segment`, opening it on first use.
    fn segment_reader(&self, segment: &Segment) -> Result<Arc<SegmentReader>> {
        let base = segment.base_offset();
        let active_base = self.registry.active_segment().base_offset();
        let mut cache = self.cache();

        if base == active_base {
            if let Some(reader) = cache.active.as_ref().filter(|r| r.base_offset() == base) {
                return Ok(Arc::clone(reader));
            }
            // A roll happened since the last read: the old active reader now
            // serves a sealed segment.
            if let Some(previous) = cache.active.take() {
                tracing::debug!(
                    topic = %self.topic(),
                    sealed = %previous.base_offset(),
                    active = %base,
                    "refreshing active segment reader"
                );
                cache.sealed.insert(previous.base_offset(), previous);
            }
            let reader = self.open_segment(segment)?;
            cache.active = Some(Arc::clone(&reader));
            return Ok(reader);
        }

        if let Some(reader) = cache.sealed.get(&base) {
            return Ok(Arc::clone(reader));
        }
        let reader = self.open_segment(segment)?;
        cache.sealed.insert(base, Arc::clone(&reader));
        Ok(reader)
    }

    fn open_segment(&self, segment: &Segment) -> Result<Arc<SegmentReader>> {
        let reader = SegmentReader::open(segment.clone(), self.codecs, self.read_buffer_size)?;
        Ok(Arc::new(reader))
    }

    /// Reads the batch holding `offset`.
    ///
    /// Returns `Ok(None)` for offsets at or past the high-water mark.
    ///
    /// # Errors
    ///
    /// [`StorageError::OutOfRange`] for offsets below the topic's first
    /// segment, and storage errors for damaged batches.
    pub fn read_record_batch(&self, offset: Offset) -> Result<Option<RecordBatch>> {
        self.ensure_open()?;
        if offset >= self.high_water_mark() {
            return Ok(None);
        }

        let Some(segment) = self.registry.segment_containing(offset) else {
            return Err(StorageError::OutOfRange {
                offset,
                base_offset: self.registry.earliest_offset(),
            }
            .into());
        };
        Ok(self.segment_reader(&segment)?.read_batch(offset)?)
    }

    /// Reads the record at `offset`.
    pub fn read_record(&self, offset: Offset) -> Result<Option<LogRecord>> {
        Ok(self.read_record_batch(offset)?.and_then(|batch| {
            batch
                .into_records()
                .into_iter()
                .find(|record| record.offset() == offset)
        }))
    }

    /// Lazily yields the batches intersecting `[start, end)`, in offset
    /// order across segments. `end` is clamped to the high-water mark.
    pub fn read_range(&self, start: Offset, end: Offset) -> Result<LogBatches> {
        self.ensure_open()?;
        let end = end.min(self.high_water_mark());
        if start >= end {
            return Ok(LogBatches::empty());
        }

        let mut segments = Vec::new();
        for segment in self.readable_segments(end) {
            if segment.next_offset() <= start {
                continue;
            }
            segments.push(self.segment_reader(&segment)?.read_range(start, end)?);
        }
        Ok(LogBatches::new(segments, end))
    }

    /// Lazily yields every record of the batches whose base timestamp is
    /// at or after `timestamp`.
    pub fn read_from_timestamp(&self, timestamp: Timestamp) -> Result<LogRecords> {
        self.ensure_open()?;
        let high_water_mark = self.high_water_mark();

        let mut segments = Vec::new();
        for segment in self.readable_segments(high_water_mark) {
            segments.push(self.segment_reader(&segment)?.read_from_timestamp(timestamp)?);
        }
        Ok(LogRecords::new(LogBatches::new(segments, high_water_mark)))
    }

    /// Segments holding at least one offset below `end`.
    fn readable_segments(&self, end: Offset) -> impl Iterator<Item = Segment> + use<> {
        self.registry
            .segments()
            .into_iter()
            .filter(move |s| !s.is_empty() && s.base_offset() < end)
    }

    /// Re-syncs the cache with the registry: picks up a new active segment
    /// and drops readers of segments that are no longer registered.
    pub fn refresh(&self) {
        let segments = self.registry.segments();
        let active = self.registry.active_segment().base_offset();
        let mut cache = self.cache();

        if let Some(previous) = cache.active.take_if(|r| r.base_offset() != active) {
            cache.sealed.insert(previous.base_offset(), previous);
        }
        let before = cache.sealed.len();
        cache
            .sealed
            .retain(|base, _| segments.iter().any(|s| s.base_offset() == *base && *base != active));
        tracing::debug!(
            topic = %self.topic(),
            dropped = before - cache.sealed.len(),
            cached = cache.sealed.len(),
            "refreshed reader cache"
        );
    }

    /// Closes every cached segment reader. Iterators already handed out keep
    /// working; new reads fail with [`CommitLogError::Disposed`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut cache = self.cache();
        for reader in cache.sealed.values().chain(cache.active.iter()) {
            reader.close();
        }
        cache.sealed.clear();
        cache.active = None;
        tracing::debug!(topic = %self.topic(), "reader closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for CommitLogReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitLogReader")
            .field("topic", self.topic())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Batches from consecutive segments, stopping at the first batch that
/// reaches past the bound fixed when the scan started.
#[derive(Debug)]
pub struct LogBatches {
    segments: std::vec::IntoIter<SegmentBatches>,
    current: Option<SegmentBatches>,
    end: Offset,
}

impl LogBatches {
    fn new(segments: Vec<SegmentBatches>, end: Offset) -> Self {
        Self {
            segments: segments.into_iter(),
            current: None,
            end,
        }
    }

    fn empty() -> Self {
        Self::new(Vec::new(), Offset::new(0))
    }
}

impl Iterator for LogBatches {
    type Item = RecordBatch;

    fn next(&mut self) -> Option<RecordBatch> {
        loop {
            if let Some(current) = self.current.as_mut() {
                match current.next() {
                    Some(batch) if batch.base_offset() < self.end => return Some(batch),
                    Some(_) => {
                        self.segments = Vec::new().into_iter();
                        self.current = None;
                        return None;
                    }
                    None => self.current = None,
                }
            }
            self.current = Some(self.segments.next()?);
        }
    }
}

/// Records of a [`LogBatches`] scan, one at a time.
#[derive(Debug)]
pub struct LogRecords {
    batches: LogBatches,
    records: std::vec::IntoIter<LogRecord>,
}

impl LogRecords {
    fn new(batches: LogBatches) -> Self {
        Self {
            batches,
            records: Vec::new().into_iter(),
        }
    }
}

impl Iterator for LogRecords {
    type Item = LogRecord;

    fn next(&mut self) -> Option<LogRecord> {
        loop {
            if let Some(record) = self.records.next() {
                return Some(record);
            }
            self.records = self.batches.next()?.into_records().into_iter();
        }
    }
}
