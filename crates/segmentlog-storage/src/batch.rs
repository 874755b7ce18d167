//! Record batch codec.
//!
//! A batch is the unit of atomicity on disk: it is checksummed, optionally
//! compressed, and written with a single append. Records inside a batch have
//! contiguous offsets starting at the batch's base offset.
//!
//! # Batch Format
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  Offset  │  Size  │  Field                                       │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  0       │  8     │  base_offset (u64)                           │
//! │  8       │  4     │  batch_length (u32) = 26 + records_length    │
//! │  12      │  8     │  last_offset (u64)                           │
//! │  20      │  4     │  records_length (u32)                        │
//! │  24      │  1     │  magic (0x02)                                │
//! │  25      │  4     │  crc32 of the record section as stored       │
//! │  29      │  1     │  compression (0 none, 1 lz4, 2 zstd)         │
//! │  30      │  8     │  base_timestamp (u64, epoch millis)          │
//! │  38      │  N     │  record section (records_length bytes)       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are big-endian. `batch_length` counts every byte from
//! `last_offset` onward, so a batch occupies `12 + batch_length` bytes.
//!
//! The record section is the concatenation of encoded [`LogRecord`]s,
//! compressed as a whole when the compression byte is non-zero. The CRC
//! always covers the section exactly as written, i.e. after compression.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use segmentlog_types::{CompressionKind, Offset, Timestamp};

use crate::{CodecRegistry, LogRecord, StorageError};

/// Bytes before `batch_length` starts counting: base_offset(8) + batch_length(4).
pub const BATCH_PREFIX_SIZE: usize = 12;

/// Full header size, up to the start of the record section.
pub const BATCH_HEADER_SIZE: usize = 38;

/// Header bytes counted by `batch_length`.
const BATCH_LENGTH_OVERHEAD: usize = BATCH_HEADER_SIZE - BATCH_PREFIX_SIZE;

/// On-disk batch format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum BatchMagic {
    #[default]
    V2 = 0x02,
}

impl BatchMagic {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x02 => Some(Self::V2),
            _ => None,
        }
    }
}

/// The fixed-size header of an encoded batch.
///
/// Parsing a header is enough to skip over a batch or to learn its offset
/// range without touching the record section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchHeader {
    pub base_offset: Offset,
    pub batch_length: u32,
    pub last_offset: Offset,
    pub records_length: u32,
    pub magic: BatchMagic,
    pub crc: u32,
    pub compression: CompressionKind,
    pub base_timestamp: Timestamp,
}

impl BatchHeader {
    /// Parses and validates the header at the front of `data`.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Truncated`] if fewer than [`BATCH_HEADER_SIZE`] bytes are given
    /// - [`StorageError::CorruptFormat`] on a bad magic byte or inconsistent lengths
    /// - [`StorageError::InvalidCompressionKind`] on an unknown compression byte
    pub fn parse(data: &[u8]) -> Result<Self, StorageError> {
        if data.len() < BATCH_HEADER_SIZE {
            return Err(StorageError::Truncated {
                needed: BATCH_HEADER_SIZE,
                available: data.len(),
            });
        }

        let mut buf = &data[..BATCH_HEADER_SIZE];
        let base_offset = Offset::new(buf.get_u64());
        let batch_length = buf.get_u32();
        let last_offset = Offset::new(buf.get_u64());
        let records_length = buf.get_u32();
        let magic_byte = buf.get_u8();
        let crc = buf.get_u32();
        let compression_byte = buf.get_u8();
        let base_timestamp = Timestamp::from_millis(buf.get_u64());

        let magic = BatchMagic::from_byte(magic_byte).ok_or_else(|| {
            StorageError::corrupt(format!(
                "bad magic {magic_byte:#04x} in batch at offset {base_offset}"
            ))
        })?;

        if u64::from(batch_length) != u64::from(records_length) + BATCH_LENGTH_OVERHEAD as u64 {
            return Err(StorageError::corrupt(format!(
                "batch length {batch_length} disagrees with record section length {records_length}"
            )));
        }

        if last_offset < base_offset {
            return Err(StorageError::corrupt(format!(
                "last offset {last_offset} precedes base offset {base_offset}"
            )));
        }
        // The offset after the batch must be representable.
        if last_offset == Offset::new(u64::MAX) {
            return Err(StorageError::corrupt(format!(
                "last offset {last_offset} leaves no next offset"
            )));
        }

        let compression = CompressionKind::from_byte(compression_byte).ok_or(
            StorageError::InvalidCompressionKind {
                byte: compression_byte,
                base_offset,
            },
        )?;

        Ok(Self {
            base_offset,
            batch_length,
            last_offset,
            records_length,
            magic,
            crc,
            compression,
            base_timestamp,
        })
    }

    /// Total encoded size of the batch, header included.
    pub fn total_len(&self) -> usize {
        BATCH_PREFIX_SIZE + self.batch_length as usize
    }

    /// Returns true if `offset` falls in `[base_offset, last_offset]`.
    pub fn contains(&self, offset: Offset) -> bool {
        self.base_offset <= offset && offset <= self.last_offset
    }

    /// Returns true if the batch carries no records. `section` is the
    /// record section as stored.
    ///
    /// A compressed empty batch still has a non-empty section (the codec's
    /// framing), so a compressed batch covering a single offset is
    /// decompressed to find out.
    pub fn is_empty(&self, section: &[u8], codecs: &CodecRegistry) -> Result<bool, StorageError> {
        if self.records_length == 0 {
            return Ok(true);
        }
        if self.last_offset > self.base_offset || !self.compression.is_compressed() {
            return Ok(false);
        }
        Ok(codecs.decompress(self.compression, section)?.is_empty())
    }

    /// Checks the stored CRC against the record section as written.
    pub fn verify_checksum(&self, section: &[u8]) -> Result<(), StorageError> {
        let actual = crc32fast::hash(section);
        if actual != self.crc {
            return Err(StorageError::ChecksumMismatch {
                base_offset: self.base_offset,
                expected: self.crc,
                actual,
            });
        }
        Ok(())
    }
}

/// A group of records written and checksummed as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordBatch {
    magic: BatchMagic,
    base_offset: Offset,
    base_timestamp: Timestamp,
    compression: CompressionKind,
    records: Vec<LogRecord>,
}

impl RecordBatch {
    /// Creates an uncompressed batch from records with contiguous offsets.
    ///
    /// The base timestamp is the earliest record timestamp (epoch for an
    /// empty batch).
    ///
    /// # Panics
    ///
    /// Debug builds panic if record offsets are not `base_offset, base_offset + 1, ...`.
    pub fn new(base_offset: Offset, records: Vec<LogRecord>) -> Self {
        debug_assert!(
            records
                .iter()
                .enumerate()
                .all(|(i, r)| r.offset() == base_offset + i as u64),
            "record offsets must be contiguous from {base_offset}"
        );

        let base_timestamp = records
            .iter()
            .map(LogRecord::timestamp)
            .min()
            .unwrap_or(Timestamp::EPOCH);

        Self {
            magic: BatchMagic::default(),
            base_offset,
            base_timestamp,
            compression: CompressionKind::None,
            records,
        }
    }

    /// Builds a batch assigning contiguous offsets from `base_offset` to
    /// `payloads`, all stamped with `timestamp`.
    pub fn from_payloads<I>(base_offset: Offset, timestamp: Timestamp, payloads: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        let records = payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| LogRecord::new(base_offset + i as u64, timestamp, payload))
            .collect();
        Self::new(base_offset, records)
    }

    /// Sets the codec applied to the record section when encoding.
    pub fn with_compression(mut self, compression: CompressionKind) -> Self {
        self.compression = compression;
        self
    }

    /// Moves every record so the batch starts at `base_offset`, keeping
    /// timestamps and payloads.
    pub fn rebase(self, base_offset: Offset) -> Self {
        let records = self
            .records
            .into_iter()
            .enumerate()
            .map(|(i, r)| r.with_offset(base_offset + i as u64))
            .collect();
        Self {
            base_offset,
            records,
            ..self
        }
    }

    pub fn magic(&self) -> BatchMagic {
        self.magic
    }

    pub fn base_offset(&self) -> Offset {
        self.base_offset
    }

    /// Offset of the last record; equals the base offset for an empty batch.
    pub fn last_offset(&self) -> Offset {
        self.base_offset + (self.records.len() as u64).saturating_sub(1)
    }

    /// First offset after this batch.
    pub fn next_offset(&self) -> Offset {
        self.base_offset + self.records.len() as u64
    }

    pub fn base_timestamp(&self) -> Timestamp {
        self.base_timestamp
    }

    /// Latest record timestamp, or the base timestamp for an empty batch.
    pub fn max_timestamp(&self) -> Timestamp {
        self.records
            .iter()
            .map(LogRecord::timestamp)
            .max()
            .unwrap_or(self.base_timestamp)
    }

    pub fn compression(&self) -> CompressionKind {
        self.compression
    }

    /// Returns true if the record section is stored compressed.
    pub fn compressed(&self) -> bool {
        self.compression.is_compressed()
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<LogRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns true if `offset` belongs to one of this batch's records.
    pub fn contains(&self, offset: Offset) -> bool {
        self.base_offset <= offset && offset < self.next_offset()
    }

    /// Returns the record at `offset`, if this batch holds it.
    pub fn record(&self, offset: Offset) -> Option<&LogRecord> {
        if !self.contains(offset) {
            return None;
        }
        self.records.get(offset.relative_to(self.base_offset) as usize)
    }

    /// Encodes the batch into a new buffer.
    pub fn encode(&self, codecs: &CodecRegistry) -> Result<Bytes, StorageError> {
        let mut buf = BytesMut::new();
        self.encode_into(codecs, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Appends the encoded batch to `buf`, so callers can reuse one buffer
    /// across appends.
    pub fn encode_into(&self, codecs: &CodecRegistry, buf: &mut BytesMut) -> Result<(), StorageError> {
        let raw_len: usize = self.records.iter().map(LogRecord::encoded_len).sum();
        let mut section = Vec::with_capacity(raw_len);
        for record in &self.records {
            record.encode(self.base_timestamp, &mut section);
        }

        let section = if self.compressed() {
            codecs.compress(self.compression, &section)?
        } else {
            section
        };

        let records_length = u32::try_from(section.len())
            .ok()
            .filter(|len| len.checked_add(BATCH_LENGTH_OVERHEAD as u32).is_some())
            .ok_or_else(|| {
                StorageError::corrupt(format!(
                    "record section of {} bytes does not fit a batch",
                    section.len()
                ))
            })?;

        buf.reserve(BATCH_HEADER_SIZE + section.len());
        buf.put_u64(self.base_offset.as_u64());
        buf.put_u32(records_length + BATCH_LENGTH_OVERHEAD as u32);
        buf.put_u64(self.last_offset().as_u64());
        buf.put_u32(records_length);
        buf.put_u8(self.magic.as_byte());
        buf.put_u32(crc32fast::hash(&section));
        buf.put_u8(self.compression.as_byte());
        buf.put_u64(self.base_timestamp.as_millis());
        buf.put_slice(&section);

        Ok(())
    }

    /// Decodes one batch from the front of `data`.
    ///
    /// Returns the batch and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Truncated`] if `data` ends before the batch does
    /// - [`StorageError::CorruptFormat`] on a bad header or record layout
    /// - [`StorageError::ChecksumMismatch`] if the record section was altered
    /// - [`StorageError::DecompressionFailed`] if the section does not decompress
    pub fn decode(data: &Bytes, codecs: &CodecRegistry) -> Result<(Self, usize), StorageError> {
        let header = BatchHeader::parse(data)?;
        let total = header.total_len();
        if data.len() < total {
            return Err(StorageError::Truncated {
                needed: total,
                available: data.len(),
            });
        }

        let stored = data.slice(BATCH_HEADER_SIZE..total);
        header.verify_checksum(&stored)?;

        let section = if header.compression.is_compressed() {
            Bytes::from(codecs.decompress(header.compression, &stored)?)
        } else {
            stored
        };

        let records = decode_records(&section, &header)?;

        Ok((
            Self {
                magic: header.magic,
                base_offset: header.base_offset,
                base_timestamp: header.base_timestamp,
                compression: header.compression,
                records,
            },
            total,
        ))
    }
}

fn decode_records(section: &Bytes, header: &BatchHeader) -> Result<Vec<LogRecord>, StorageError> {
    let mut records = Vec::new();
    let mut rest = section.clone();

    while !rest.is_empty() {
        let (record, consumed) = LogRecord::decode(&rest, header.base_timestamp).map_err(|e| {
            // A short record inside a CRC-verified section is a layout error,
            // not a torn tail.
            if e.is_truncation() {
                StorageError::corrupt(format!(
                    "record section of batch {} ends mid-record",
                    header.base_offset
                ))
            } else {
                e
            }
        })?;

        let expected = header
            .base_offset
            .as_u64()
            .checked_add(records.len() as u64)
            .ok_or_else(|| {
                StorageError::corrupt(format!(
                    "batch {} holds more records than offsets remain",
                    header.base_offset
                ))
            })?;
        if record.offset().as_u64() != expected {
            return Err(StorageError::corrupt(format!(
                "record offset {} where {expected} was expected",
                record.offset()
            )));
        }

        records.push(record);
        rest.advance(consumed);
    }

    let last = header.base_offset + (records.len() as u64).saturating_sub(1);
    if last != header.last_offset {
        return Err(StorageError::corrupt(format!(
            "header last offset {} but records end at {last}",
            header.last_offset
        )));
    }

    Ok(records)
}
