//! Segments: one `(log, offset index, time index)` file triple covering a
//! contiguous offset range.
//!
//! # File Layout
//!
//! ```text
//! {topic_dir}/
//! ├── 00000000000000000000.log        <- sealed segment, base offset 0
//! ├── 00000000000000000000.index
//! ├── 00000000000000000000.timeindex
//! ├── 00000000000000004212.log        <- active segment, base offset 4212
//! ├── 00000000000000004212.index
//! └── 00000000000000004212.timeindex
//! ```
//!
//! A segment's base offset is fixed at creation and is encoded in its file
//! names as a zero-padded 20-digit decimal, so lexical order equals offset
//! order.

mod reader;
mod writer;

use std::path::{Path, PathBuf};

use segmentlog_types::Offset;

pub use reader::{BatchScanner, RawBatch, SegmentBatches, SegmentReader, SegmentRecovery};
pub use writer::{SegmentWriter, SegmentWriterOptions};

pub const LOG_EXTENSION: &str = "log";
pub const INDEX_EXTENSION: &str = "index";
pub const TIME_INDEX_EXTENSION: &str = "timeindex";

/// Formats the shared file stem of a segment.
pub fn segment_file_stem(base_offset: Offset) -> String {
    format!("{:020}", base_offset.as_u64())
}

/// Parses the base offset out of a `{base_offset}.log` path.
///
/// Returns `None` for index files, foreign files, and stems that are not
/// decimal numbers.
pub fn parse_log_file_name(path: &Path) -> Option<Offset> {
    if path.extension()? != LOG_EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse::<u64>().ok().map(Offset::new)
}

/// Paths and offset range of one segment.
///
/// `next_offset` tracks writer progress; readers rely on the topic's
/// high-water mark instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    log_path: PathBuf,
    index_path: PathBuf,
    time_index_path: PathBuf,
    base_offset: Offset,
    next_offset: Offset,
}

impl Segment {
    /// Describes the segment starting at `base_offset` inside `dir`.
    ///
    /// No files are created; the writer does that when it opens the segment.
    pub fn new(dir: impl AsRef<Path>, base_offset: Offset) -> Self {
        let dir = dir.as_ref();
        let stem = segment_file_stem(base_offset);
        Self {
            log_path: dir.join(format!("{stem}.{LOG_EXTENSION}")),
            index_path: dir.join(format!("{stem}.{INDEX_EXTENSION}")),
            time_index_path: dir.join(format!("{stem}.{TIME_INDEX_EXTENSION}")),
            base_offset,
            next_offset: base_offset,
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn time_index_path(&self) -> &Path {
        &self.time_index_path
    }

    pub fn base_offset(&self) -> Offset {
        self.base_offset
    }

    pub fn next_offset(&self) -> Offset {
        self.next_offset
    }

    pub fn set_next_offset(&mut self, next_offset: Offset) {
        debug_assert!(
            next_offset >= self.base_offset,
            "next offset {next_offset} below base {}",
            self.base_offset
        );
        self.next_offset = next_offset;
    }

    /// Returns a copy with `next_offset` set.
    pub fn with_next_offset(mut self, next_offset: Offset) -> Self {
        self.set_next_offset(next_offset);
        self
    }

    /// Returns true if no record has been recorded in this segment.
    pub fn is_empty(&self) -> bool {
        self.next_offset == self.base_offset
    }
}
