//! Per-topic segment registry.
//!
//! The registry is the single source of truth for which segments a topic
//! has, which one is active, and how far readers may read (the high-water
//! mark). The appender mutates it; readers take snapshots.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use segmentlog_types::{Offset, TopicName};

use crate::index::{self, OffsetIndexEntry, TimeIndexEntry};
use crate::segment::{Segment, SegmentReader, SegmentRecovery, parse_log_file_name};
use crate::{CodecRegistry, StorageError};

#[derive(Debug)]
struct RegistryState {
    active: Segment,
    high_water_mark: Offset,
    /// Sealed segments by base offset, each with `next_offset` fixed.
    sealed: BTreeMap<Offset, Segment>,
}

/// Tracks a topic's segments and high-water mark.
///
/// # Invariants
///
/// - The active segment's base is greater than every sealed segment's base
/// - The high-water mark never decreases
/// - Every offset below the high-water mark is durable in some segment
#[derive(Debug)]
pub struct TopicSegmentRegistry {
    topic: TopicName,
    directory: PathBuf,
    state: RwLock<RegistryState>,
}

impl TopicSegmentRegistry {
    /// Creates a registry for a topic with no data on disk yet.
    pub fn new(topic: TopicName, directory: impl Into<PathBuf>, base_offset: Offset) -> Self {
        let directory = directory.into();
        let active = Segment::new(&directory, base_offset);
        Self {
            topic,
            directory,
            state: RwLock::new(RegistryState {
                active,
                high_water_mark: base_offset,
                sealed: BTreeMap::new(),
            }),
        }
    }

    /// Opens the registry for `directory`, recovering whatever is on disk.
    ///
    /// Every `{base}.log` file becomes a segment; the newest is the active
    /// one. The active segment is scanned batch by batch and anything past
    /// the last valid batch (a torn write, or a corrupt tail) is truncated
    /// from the log and both indexes. `base_offset` only applies when the
    /// directory holds no segments.
    pub fn open(
        topic: TopicName,
        directory: impl Into<PathBuf>,
        base_offset: Offset,
        read_buffer_size: usize,
    ) -> Result<Self, StorageError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        let bases = list_segment_bases(&directory)?;
        let Some((&last_base, sealed_bases)) = bases.split_last() else {
            tracing::info!(%topic, directory = %directory.display(), %base_offset, "starting empty topic");
            return Ok(Self::new(topic, directory, base_offset));
        };

        let mut sealed = BTreeMap::new();
        for (i, &base) in sealed_bases.iter().enumerate() {
            let next = bases[i + 1];
            sealed.insert(base, Segment::new(&directory, base).with_next_offset(next));
        }

        let active = Segment::new(&directory, last_base);
        let recovery = repair_segment(&active, read_buffer_size, true)?;
        let high_water_mark = recovery.next_offset;

        tracing::info!(
            %topic,
            directory = %directory.display(),
            segments = bases.len(),
            %high_water_mark,
            discarded_bytes = recovery.log_len - recovery.valid_len,
            "recovered topic"
        );

        Ok(Self {
            topic,
            directory,
            state: RwLock::new(RegistryState {
                active: active.with_next_offset(high_water_mark),
                high_water_mark,
                sealed,
            }),
        })
    }

    pub fn topic(&self) -> &TopicName {
        &self.topic
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn active_segment(&self) -> Segment {
        self.read().active.clone()
    }

    /// Makes `segment` the active segment and seals the previous one at
    /// `segment.base_offset()`.
    pub fn update_active_segment(&self, segment: Segment) {
        let mut state = self.write();
        debug_assert!(
            segment.base_offset() > state.active.base_offset()
                || (segment.base_offset() == state.active.base_offset() && state.active.is_empty()),
            "new active segment {} does not follow {}",
            segment.base_offset(),
            state.active.base_offset()
        );

        let base = segment.base_offset();
        let mut previous = std::mem::replace(&mut state.active, segment);
        if previous.base_offset() == base {
            return;
        }
        previous.set_next_offset(base);
        tracing::debug!(
            topic = %self.topic,
            sealed = %previous.base_offset(),
            active = %base,
            "rolled active segment"
        );
        state.sealed.insert(previous.base_offset(), previous);
    }

    /// One past the last durable offset. Readers never see offsets at or
    /// above it.
    pub fn high_water_mark(&self) -> Offset {
        self.read().high_water_mark
    }

    pub fn update_high_water_mark(&self, high_water_mark: Offset) {
        let mut state = self.write();
        debug_assert!(
            high_water_mark >= state.high_water_mark,
            "high-water mark moved backwards: {} -> {high_water_mark}",
            state.high_water_mark
        );
        state.high_water_mark = high_water_mark;
        if high_water_mark >= state.active.base_offset() {
            state.active.set_next_offset(high_water_mark);
        }
    }

    /// Lowest offset any segment can hold.
    pub fn earliest_offset(&self) -> Offset {
        let state = self.read();
        state
            .sealed
            .keys()
            .next()
            .copied()
            .unwrap_or_else(|| state.active.base_offset())
    }

    /// Segment whose range holds `offset`: the active segment for anything
    /// at or above its base, otherwise the sealed segment with the greatest
    /// base not above `offset`. `None` if `offset` precedes every segment.
    pub fn segment_containing(&self, offset: Offset) -> Option<Segment> {
        let state = self.read();
        if offset >= state.active.base_offset() {
            return Some(state.active.clone());
        }
        state
            .sealed
            .range(..=offset)
            .next_back()
            .map(|(_, segment)| segment.clone())
    }

    /// All segments in base-offset order, active last.
    pub fn segments(&self) -> Vec<Segment> {
        let state = self.read();
        state
            .sealed
            .values()
            .cloned()
            .chain(std::iter::once(state.active.clone()))
            .collect()
    }

    pub fn segment_count(&self) -> usize {
        self.read().sealed.len() + 1
    }
}

/// Base offsets of every segment log in `directory`, ascending.
pub fn list_segment_bases(directory: &Path) -> Result<Vec<Offset>, StorageError> {
    let mut bases = Vec::new();
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(base) = parse_log_file_name(&entry.path()) {
            bases.push(base);
        }
    }
    bases.sort_unstable();
    Ok(bases)
}

/// Scans a segment and, if `truncate` is set, cuts the log and both indexes
/// back to the end of the last valid batch.
///
/// A segment whose log file does not exist reports as empty.
pub fn repair_segment(
    segment: &Segment,
    read_buffer_size: usize,
    truncate: bool,
) -> Result<SegmentRecovery, StorageError> {
    if !segment.log_path().exists() {
        return Ok(SegmentRecovery {
            next_offset: segment.base_offset(),
            valid_len: 0,
            log_len: 0,
            batches: 0,
            stop_reason: None,
        });
    }

    let reader = SegmentReader::open(segment.clone(), CodecRegistry::default(), read_buffer_size)?;
    let recovery = reader.recover()?;
    reader.close();

    if truncate && recovery.has_invalid_tail() {
        tracing::warn!(
            base_offset = %segment.base_offset(),
            valid_len = recovery.valid_len,
            log_len = recovery.log_len,
            reason = recovery.stop_reason.as_ref().map(ToString::to_string),
            "truncating invalid segment tail"
        );

        let log = OpenOptions::new().write(true).open(segment.log_path())?;
        log.set_len(recovery.valid_len)?;
        log.sync_all()?;

        index::truncate_entries_beyond::<OffsetIndexEntry>(segment.index_path(), recovery.valid_len)?;
        index::truncate_entries_beyond::<TimeIndexEntry>(segment.time_index_path(), recovery.valid_len)?;
    }

    Ok(recovery)
}
