//! Compression codecs for the record section of a batch.
//!
//! A batch compresses its concatenated encoded records as one unit. The
//! batch header's compression flag stores the [`CompressionKind`]
//! discriminant, and the CRC is computed over the bytes *after* the codec
//! has run, so a reader can reject damaged batches without decompressing.
//!
//! ```text
//! records ──encode──► raw section ──Codec::compress──► payload ──crc32──► header
//! ```

use segmentlog_types::CompressionKind;

use crate::StorageError;

/// Transforms a batch's record section.
pub trait Codec: Send + Sync {
    /// Returns the compression kind written to the batch header.
    fn kind(&self) -> CompressionKind;

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, StorageError>;

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, StorageError>;
}

/// Passthrough codec for uncompressed batches.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneCodec;

impl Codec for NoneCodec {
    fn kind(&self) -> CompressionKind {
        CompressionKind::None
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, StorageError> {
        Ok(input.to_vec())
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, StorageError> {
        Ok(input.to_vec())
    }
}

/// LZ4 block codec (`lz4_flex`). The uncompressed size is prepended so
/// decompression can allocate exactly once.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn kind(&self) -> CompressionKind {
        CompressionKind::Lz4
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, StorageError> {
        Ok(lz4_flex::compress_prepend_size(input))
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, StorageError> {
        lz4_flex::decompress_size_prepended(input).map_err(|e| {
            StorageError::DecompressionFailed {
                codec: "lz4",
                reason: e.to_string(),
            }
        })
    }
}

/// Zstandard codec.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub const DEFAULT_LEVEL: i32 = 3;

    /// Creates a codec compressing at `level` (1-22).
    pub fn new(level: i32) -> Self {
        debug_assert!(
            (1..=22).contains(&level),
            "zstd level {level} outside 1..=22"
        );
        Self { level }
    }

    pub fn level(&self) -> i32 {
        self.level
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LEVEL)
    }
}

impl Codec for ZstdCodec {
    fn kind(&self) -> CompressionKind {
        CompressionKind::Zstd
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, StorageError> {
        zstd::encode_all(input, self.level).map_err(|e| StorageError::CompressionFailed {
            codec: "zstd",
            reason: e.to_string(),
        })
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, StorageError> {
        zstd::decode_all(input).map_err(|e| StorageError::DecompressionFailed {
            codec: "zstd",
            reason: e.to_string(),
        })
    }
}

/// The codec set used by batch encoding and decoding.
///
/// Decoding never depends on codec settings, so any registry can read any
/// batch; the zstd level only affects newly written batches.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecRegistry {
    none: NoneCodec,
    lz4: Lz4Codec,
    zstd: ZstdCodec,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry whose zstd codec compresses at `level`.
    pub fn with_zstd_level(level: i32) -> Self {
        Self {
            zstd: ZstdCodec::new(level),
            ..Self::default()
        }
    }

    pub fn get(&self, kind: CompressionKind) -> &dyn Codec {
        match kind {
            CompressionKind::None => &self.none,
            CompressionKind::Lz4 => &self.lz4,
            CompressionKind::Zstd => &self.zstd,
        }
    }

    pub fn compress(&self, kind: CompressionKind, data: &[u8]) -> Result<Vec<u8>, StorageError> {
        self.get(kind).compress(data)
    }

    pub fn decompress(
        &self,
        kind: CompressionKind,
        data: &[u8],
    ) -> Result<Vec<u8>, StorageError> {
        self.get(kind).decompress(data)
    }
}
