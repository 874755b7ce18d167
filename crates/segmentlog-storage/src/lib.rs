//! # segmentlog-storage: Segmented commit-log storage
//!
//! A topic's log is split into segments, each a triple of files:
//!
//! - `{base}.log`: record batches, appended and never rewritten
//! - `{base}.index`: sparse relative-offset to log-position index
//! - `{base}.timeindex`: sparse base-timestamp to log-position index
//!
//! Writes go through [`SegmentWriter`], which appends one encoded
//! [`RecordBatch`] at a time and flushes before touching the indexes.
//! Reads go through [`SegmentReader`], which seeks with the index and then
//! scans forward. [`TopicSegmentRegistry`] tracks which segments exist and
//! the high-water mark below which every offset is durable.
//!
//! Everything here is synchronous `std::fs` I/O; the async façade lives in
//! the `segmentlog` crate.

mod batch;
mod codec;
mod error;
mod file;
pub mod index;
mod record;
pub mod registry;
mod search;
pub mod segment;

pub use batch::{BATCH_HEADER_SIZE, BATCH_PREFIX_SIZE, BatchHeader, BatchMagic, RecordBatch};
pub use codec::{Codec, CodecRegistry, Lz4Codec, NoneCodec, ZstdCodec};
pub use error::StorageError;
pub use record::{LogRecord, RECORD_OVERHEAD};
pub use registry::TopicSegmentRegistry;
pub use segment::{
    BatchScanner, RawBatch, Segment, SegmentBatches, SegmentReader, SegmentRecovery, SegmentWriter,
    SegmentWriterOptions,
};

#[cfg(test)]
mod tests;
