//! Storage error types.

use segmentlog_types::Offset;
use thiserror::Error;

/// Errors produced by the codec, segment, and registry layers.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Disk read/write/flush failure.
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    /// Fewer bytes were available than a length field declared.
    ///
    /// At the tail of the active segment this means "no more data yet".
    #[error("truncated input: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// Bytes do not follow the batch or index layout (bad magic, inconsistent lengths).
    #[error("corrupt format: {reason}")]
    CorruptFormat { reason: String },

    /// Stored CRC does not match the CRC of the record section.
    #[error(
        "checksum mismatch in batch at offset {base_offset}: stored {expected:#010x}, computed {actual:#010x}"
    )]
    ChecksumMismatch {
        base_offset: Offset,
        expected: u32,
        actual: u32,
    },

    /// The requested offset lies below the segment's base offset.
    #[error("offset {offset} is below segment base offset {base_offset}")]
    OutOfRange { offset: Offset, base_offset: Offset },

    /// The compression flag byte names no known codec.
    #[error("invalid compression kind {byte:#04x} in batch at offset {base_offset}")]
    InvalidCompressionKind { byte: u8, base_offset: Offset },

    #[error("{codec} compression failed: {reason}")]
    CompressionFailed { codec: &'static str, reason: String },

    #[error("{codec} decompression failed: {reason}")]
    DecompressionFailed { codec: &'static str, reason: String },

    /// The writer or reader has been disposed.
    #[error("segment handle is closed")]
    Closed,
}

impl StorageError {
    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        Self::CorruptFormat {
            reason: reason.into(),
        }
    }

    /// Returns true for errors that mean the bytes on disk end before a full
    /// batch: a scan of the active segment treats this as "no more data yet".
    pub fn is_truncation(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }

    /// Returns true for errors caused by damaged bytes rather than I/O.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::CorruptFormat { .. }
                | Self::ChecksumMismatch { .. }
                | Self::InvalidCompressionKind { .. }
                | Self::DecompressionFailed { .. }
        )
    }
}
