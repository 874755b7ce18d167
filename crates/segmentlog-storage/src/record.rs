//! Record codec.
//!
//! A record is one `(offset, timestamp, payload)` triple. Inside a batch the
//! timestamp is stored as a delta from the batch's base timestamp.
//!
//! # Record Format
//!
//! ```text
//! [offset:u64][timestamp_delta:u64][length:u32][payload:bytes]
//!      8B             8B               4B         variable
//! ```
//!
//! All integers are big-endian.

use bytes::{Buf, BufMut, Bytes};
use segmentlog_types::{Offset, Timestamp};

use crate::StorageError;

/// Fixed bytes per record: offset(8) + delta(8) + length(4).
pub const RECORD_OVERHEAD: usize = 20;

/// A single payload with its assigned offset and append time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogRecord {
    offset: Offset,
    timestamp: Timestamp,
    payload: Bytes,
}

impl LogRecord {
    pub fn new(offset: Offset, timestamp: Timestamp, payload: impl Into<Bytes>) -> Self {
        Self {
            offset,
            timestamp,
            payload: payload.into(),
        }
    }

    pub fn offset(&self) -> Offset {
        self.offset
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Returns a copy of this record moved to `offset`.
    pub(crate) fn with_offset(self, offset: Offset) -> Self {
        Self { offset, ..self }
    }

    /// Size of this record once encoded.
    pub fn encoded_len(&self) -> usize {
        RECORD_OVERHEAD + self.payload.len()
    }

    /// Appends the encoded record to `buf`.
    ///
    /// # Panics
    ///
    /// Debug builds panic if the record's timestamp precedes `base_timestamp`
    /// or the payload exceeds `u32::MAX` bytes.
    pub fn encode(&self, base_timestamp: Timestamp, buf: &mut impl BufMut) {
        debug_assert!(
            self.timestamp >= base_timestamp,
            "record timestamp {} precedes batch base {}",
            self.timestamp,
            base_timestamp
        );
        debug_assert!(u32::try_from(self.payload.len()).is_ok());

        buf.put_u64(self.offset.as_u64());
        buf.put_u64(self.timestamp.saturating_since(base_timestamp));
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }

    /// Decodes one record from the front of `data`.
    ///
    /// Returns the record and the number of bytes consumed. The payload is a
    /// zero-copy slice of `data`.
    pub fn decode(data: &Bytes, base_timestamp: Timestamp) -> Result<(Self, usize), StorageError> {
        if data.len() < RECORD_OVERHEAD {
            return Err(StorageError::Truncated {
                needed: RECORD_OVERHEAD,
                available: data.len(),
            });
        }

        let mut header = &data[..RECORD_OVERHEAD];
        let offset = Offset::new(header.get_u64());
        let delta = header.get_u64();
        let length = header.get_u32() as usize;

        let total = RECORD_OVERHEAD + length;
        if data.len() < total {
            return Err(StorageError::Truncated {
                needed: total,
                available: data.len(),
            });
        }

        let timestamp = base_timestamp
            .as_millis()
            .checked_add(delta)
            .map(Timestamp::from_millis)
            .ok_or_else(|| {
                StorageError::corrupt(format!("timestamp delta {delta} overflows at offset {offset}"))
            })?;

        Ok((
            Self {
                offset,
                timestamp,
                payload: data.slice(RECORD_OVERHEAD..total),
            },
            total,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_layout_is_big_endian() {
        let record = LogRecord::new(Offset::new(0x0102), Timestamp::from_millis(1_005), "hey");
        let mut buf = Vec::new();
        record.encode(Timestamp::from_millis(1_000), &mut buf);

        assert_eq!(buf.len(), RECORD_OVERHEAD + 3);
        assert_eq!(&buf[0..8], &[0, 0, 0, 0, 0, 0, 0x01, 0x02]);
        assert_eq!(&buf[8..16], &5u64.to_be_bytes());
        assert_eq!(&buf[16..20], &3u32.to_be_bytes());
        assert_eq!(&buf[20..], b"hey");
    }

    #[test]
    fn decode_restores_absolute_timestamp() {
        let base = Timestamp::from_millis(50_000);
        let record = LogRecord::new(Offset::new(9), Timestamp::from_millis(50_250), "payload");
        let mut buf = Vec::new();
        record.encode(base, &mut buf);

        let (decoded, consumed) = LogRecord::decode(&Bytes::from(buf), base).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(consumed, record.encoded_len());
    }

    #[test]
    fn empty_payload_is_allowed() {
        let record = LogRecord::new(Offset::new(1), Timestamp::EPOCH, Bytes::new());
        let mut buf = Vec::new();
        record.encode(Timestamp::EPOCH, &mut buf);
        let (decoded, consumed) = LogRecord::decode(&Bytes::from(buf), Timestamp::EPOCH).unwrap();
        assert!(decoded.payload().is_empty());
        assert_eq!(consumed, RECORD_OVERHEAD);
    }

    #[test]
    fn short_header_is_truncated() {
        let err = LogRecord::decode(&Bytes::from_static(&[0u8; 12]), Timestamp::EPOCH).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Truncated {
                needed: RECORD_OVERHEAD,
                available: 12
            }
        ));
    }

    #[test]
    fn short_payload_is_truncated() {
        let record = LogRecord::new(Offset::new(3), Timestamp::EPOCH, "twelve bytes");
        let mut buf = Vec::new();
        record.encode(Timestamp::EPOCH, &mut buf);
        buf.truncate(buf.len() - 1);

        let err = LogRecord::decode(&Bytes::from(buf), Timestamp::EPOCH).unwrap_err();
        assert!(err.is_truncation());
    }
}
