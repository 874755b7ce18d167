//! Writer, reader, and registry tests against real segment files.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use proptest::prelude::*;
use segmentlog_types::{CompressionKind, Offset, Timestamp, TopicName};
use test_case::test_case;

use crate::index::{IndexFile, OffsetIndexEntry, TimeIndexEntry};
use crate::registry::{TopicSegmentRegistry, repair_segment};
use crate::*;

const READ_BUFFER: usize = 256;

fn options(index_interval_bytes: u64) -> SegmentWriterOptions {
    SegmentWriterOptions {
        max_segment_bytes: 1024 * 1024,
        index_interval_bytes,
        time_index_interval_ms: 0,
    }
}

fn batch(base: u64, ts: u64, payloads: &[&str]) -> RecordBatch {
    RecordBatch::from_payloads(
        Offset::new(base),
        Timestamp::from_millis(ts),
        payloads.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())),
    )
}

/// Appends `batch` and returns its log position.
fn append(writer: &mut SegmentWriter, batch: &RecordBatch) -> u64 {
    let bytes = batch.encode(&CodecRegistry::default()).unwrap();
    writer
        .append(&bytes, batch.base_offset(), batch.last_offset())
        .unwrap()
}

/// Writes three batches covering offsets 0..9 at timestamps 1000, 2000, 3000.
fn write_three(dir: &Path, index_interval_bytes: u64) -> (Segment, Vec<u64>) {
    let segment = Segment::new(dir, Offset::new(0));
    let mut writer = SegmentWriter::open(segment.clone(), options(index_interval_bytes)).unwrap();
    let positions = vec![
        append(&mut writer, &batch(0, 1000, &["a0", "a1", "a2"])),
        append(&mut writer, &batch(3, 2000, &["b3", "b4", "b5"])),
        append(&mut writer, &batch(6, 3000, &["c6", "c7", "c8"])),
    ];
    writer.close().unwrap();
    (segment, positions)
}

fn open_reader(segment: &Segment) -> SegmentReader {
    SegmentReader::open(segment.clone(), CodecRegistry::default(), READ_BUFFER).unwrap()
}

fn payload(record: &LogRecord) -> &[u8] {
    record.payload().as_ref()
}

#[test_case(0; "with every batch indexed")]
#[test_case(1024 * 1024; "without index entries")]
fn every_offset_reads_back_from_its_batch(index_interval_bytes: u64) {
    let dir = tempfile::tempdir().unwrap();
    let (segment, _) = write_three(dir.path(), index_interval_bytes);
    let reader = open_reader(&segment);

    for offset in 0..9 {
        let batch = reader.read_batch(Offset::new(offset)).unwrap().unwrap();
        assert!(batch.contains(Offset::new(offset)));
        let record = batch.record(Offset::new(offset)).unwrap();
        assert_eq!(record.offset(), Offset::new(offset));
        assert!(payload(record).ends_with(offset.to_string().as_bytes()));
    }
}

#[test]
fn offsets_past_the_end_are_absent() {
    let dir = tempfile::tempdir().unwrap();
    let (segment, _) = write_three(dir.path(), 0);
    let reader = open_reader(&segment);

    assert!(reader.read_batch(Offset::new(9)).unwrap().is_none());
    assert!(reader.read_batch(Offset::new(1_000)).unwrap().is_none());
}

#[test]
fn offsets_below_base_are_out_of_range() {
    let dir = tempfile::tempdir().unwrap();
    let segment = Segment::new(dir.path(), Offset::new(100));
    let mut writer = SegmentWriter::open(segment.clone(), options(0)).unwrap();
    append(&mut writer, &batch(100, 1, &["x"]));

    let reader = open_reader(&segment);
    let err = reader.read_batch(Offset::new(99)).unwrap_err();
    assert!(matches!(err, StorageError::OutOfRange { .. }));
}

#[test]
fn writer_rejects_batches_below_its_base() {
    let dir = tempfile::tempdir().unwrap();
    let segment = Segment::new(dir.path(), Offset::new(100));
    let mut writer = SegmentWriter::open(segment, options(0)).unwrap();

    let low = batch(10, 1, &["x"]);
    let bytes = low.encode(&CodecRegistry::default()).unwrap();
    let err = writer.append(&bytes, low.base_offset(), low.last_offset()).unwrap_err();
    assert!(matches!(err, StorageError::OutOfRange { .. }));
    assert_eq!(writer.log_len(), 0);
}

#[test]
fn writer_rejects_mismatched_declared_range() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = SegmentWriter::open(Segment::new(dir.path(), Offset::new(0)), options(0)).unwrap();

    let b = batch(0, 1, &["x", "y"]);
    let bytes = b.encode(&CodecRegistry::default()).unwrap();
    let err = writer.append(&bytes, Offset::new(0), Offset::new(5)).unwrap_err();
    assert!(matches!(err, StorageError::CorruptFormat { .. }));
    assert_eq!(writer.log_len(), 0);
}

#[test]
fn read_range_yields_intersecting_batches() {
    let dir = tempfile::tempdir().unwrap();
    let (segment, _) = write_three(dir.path(), 0);
    let reader = open_reader(&segment);

    let bases: Vec<u64> = reader
        .read_range(Offset::new(4), Offset::new(7))
        .unwrap()
        .map(|b| b.base_offset().as_u64())
        .collect();
    assert_eq!(bases, vec![3, 6]);

    let none: Vec<_> = reader
        .read_range(Offset::new(9), Offset::new(20))
        .unwrap()
        .collect();
    assert!(none.is_empty());
}

#[test]
fn read_from_timestamp_skips_older_batches() {
    let dir = tempfile::tempdir().unwrap();
    let (segment, _) = write_three(dir.path(), 0);
    let reader = open_reader(&segment);

    let bases = |ts: u64| -> Vec<u64> {
        reader
            .read_from_timestamp(Timestamp::from_millis(ts))
            .unwrap()
            .map(|b| b.base_offset().as_u64())
            .collect()
    };
    assert_eq!(bases(0), vec![0, 3, 6]);
    assert_eq!(bases(1500), vec![3, 6]);
    assert_eq!(bases(3000), vec![6]);
    assert!(bases(3001).is_empty());
}

#[test]
fn read_from_timestamp_keeps_every_batch_sharing_the_bound() {
    let dir = tempfile::tempdir().unwrap();
    let segment = Segment::new(dir.path(), Offset::new(0));
    let mut writer = SegmentWriter::open(segment.clone(), options(0)).unwrap();
    for base in 0..5 {
        append(&mut writer, &batch(base, 1000, &["same"]));
    }
    append(&mut writer, &batch(5, 2000, &["later"]));
    writer.close().unwrap();

    let times: IndexFile<TimeIndexEntry> = IndexFile::open(segment.time_index_path()).unwrap().unwrap();
    let stamps: Vec<u64> = times
        .entries()
        .unwrap()
        .iter()
        .map(|e| e.timestamp.as_millis())
        .collect();
    assert_eq!(stamps, vec![1000, 2000]);

    let reader = open_reader(&segment);
    let bases: Vec<u64> = reader
        .read_from_timestamp(Timestamp::from_millis(1000))
        .unwrap()
        .map(|b| b.base_offset().as_u64())
        .collect();
    assert_eq!(bases, vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn indexes_point_at_batch_starts() {
    let dir = tempfile::tempdir().unwrap();
    let (segment, positions) = write_three(dir.path(), 0);

    let offsets: IndexFile<OffsetIndexEntry> = IndexFile::open(segment.index_path()).unwrap().unwrap();
    let entries = offsets.entries().unwrap();
    assert_eq!(
        entries.iter().map(|e| e.position).collect::<Vec<_>>(),
        positions
    );
    assert_eq!(
        entries.iter().map(|e| e.relative_offset).collect::<Vec<_>>(),
        vec![0, 3, 6]
    );

    let times: IndexFile<TimeIndexEntry> = IndexFile::open(segment.time_index_path()).unwrap().unwrap();
    let times = times.entries().unwrap();
    assert_eq!(times.len(), 3);
    assert!(times.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[test]
fn time_index_always_records_the_first_batch() {
    let dir = tempfile::tempdir().unwrap();
    let segment = Segment::new(dir.path(), Offset::new(0));
    let mut writer = SegmentWriter::open(
        segment.clone(),
        SegmentWriterOptions {
            time_index_interval_ms: 10_000,
            ..options(0)
        },
    )
    .unwrap();
    append(&mut writer, &batch(0, 5_000, &["a"]));
    append(&mut writer, &batch(1, 6_000, &["b"]));
    append(&mut writer, &batch(2, 15_000, &["c"]));
    writer.close().unwrap();

    let times: IndexFile<TimeIndexEntry> = IndexFile::open(segment.time_index_path()).unwrap().unwrap();
    let stamps: Vec<u64> = times
        .entries()
        .unwrap()
        .iter()
        .map(|e| e.timestamp.as_millis())
        .collect();
    assert_eq!(stamps, vec![5_000, 15_000]);
}

#[test_case(CompressionKind::None)]
#[test_case(CompressionKind::Lz4)]
#[test_case(CompressionKind::Zstd)]
fn compressed_batches_read_back(compression: CompressionKind) {
    let dir = tempfile::tempdir().unwrap();
    let segment = Segment::new(dir.path(), Offset::new(0));
    let mut writer = SegmentWriter::open(segment.clone(), options(0)).unwrap();

    let payloads: Vec<String> = (0..50).map(|i| format!("event-{i:04}-{}", "x".repeat(40))).collect();
    let refs: Vec<&str> = payloads.iter().map(String::as_str).collect();
    let original = batch(0, 7, &refs).with_compression(compression);
    append(&mut writer, &original);

    let read = open_reader(&segment).read_batch(Offset::new(25)).unwrap().unwrap();
    assert_eq!(read.compression(), compression);
    assert_eq!(read.records(), original.records());
}

#[test]
fn raw_bytes_match_what_was_written() {
    let dir = tempfile::tempdir().unwrap();
    let segment = Segment::new(dir.path(), Offset::new(0));
    let mut writer = SegmentWriter::open(segment.clone(), options(0)).unwrap();
    let b = batch(0, 1, &["one", "two"]);
    let encoded = b.encode(&CodecRegistry::default()).unwrap();
    writer.append(&encoded, b.base_offset(), b.last_offset()).unwrap();

    let raw = open_reader(&segment).read_batch_bytes(Offset::new(1)).unwrap().unwrap();
    assert_eq!(raw, encoded);
}

fn append_garbage(segment: &Segment, bytes: &[u8]) {
    let mut log = OpenOptions::new().append(true).open(segment.log_path()).unwrap();
    log.write_all(bytes).unwrap();
}

fn flip_byte(segment: &Segment, position: u64) {
    let mut data = std::fs::read(segment.log_path()).unwrap();
    data[position as usize] ^= 0xFF;
    std::fs::write(segment.log_path(), data).unwrap();
}

#[test]
fn torn_tail_reads_as_absent() {
    let dir = tempfile::tempdir().unwrap();
    let (segment, _) = write_three(dir.path(), 0);
    let torn = batch(9, 4000, &["d9"]).encode(&CodecRegistry::default()).unwrap();
    append_garbage(&segment, &torn[..torn.len() - 3]);

    let reader = open_reader(&segment);
    assert!(reader.read_batch(Offset::new(9)).unwrap().is_none());
    assert_eq!(reader.read_range(Offset::new(0), Offset::new(100)).unwrap().count(), 3);
}

#[test]
fn corrupt_batch_is_an_error_on_direct_read() {
    let dir = tempfile::tempdir().unwrap();
    let (segment, positions) = write_three(dir.path(), 0);
    flip_byte(&segment, positions[1] + BATCH_HEADER_SIZE as u64 + 2);

    let reader = open_reader(&segment);
    let err = reader.read_batch(Offset::new(4)).unwrap_err();
    assert!(matches!(err, StorageError::ChecksumMismatch { .. }));

    // Scans stop at the damaged batch.
    let bases: Vec<u64> = reader
        .read_range(Offset::new(0), Offset::new(9))
        .unwrap()
        .map(|b| b.base_offset().as_u64())
        .collect();
    assert_eq!(bases, vec![0]);
}

#[test]
fn recovery_truncates_log_and_indexes_after_last_valid_batch() {
    let dir = tempfile::tempdir().unwrap();
    let (segment, positions) = write_three(dir.path(), 0);
    flip_byte(&segment, positions[2] + BATCH_HEADER_SIZE as u64);

    let report = repair_segment(&segment, READ_BUFFER, true).unwrap();
    assert_eq!(report.next_offset, Offset::new(6));
    assert_eq!(report.valid_len, positions[2]);
    assert_eq!(report.batches, 2);
    assert!(matches!(report.stop_reason, Some(StorageError::ChecksumMismatch { .. })));

    assert_eq!(std::fs::metadata(segment.log_path()).unwrap().len(), positions[2]);
    let offsets: IndexFile<OffsetIndexEntry> = IndexFile::open(segment.index_path()).unwrap().unwrap();
    assert_eq!(offsets.entry_count().unwrap(), 2);
    let times: IndexFile<TimeIndexEntry> = IndexFile::open(segment.time_index_path()).unwrap().unwrap();
    assert_eq!(times.entry_count().unwrap(), 2);

    // A second pass finds nothing to repair.
    let again = repair_segment(&segment, READ_BUFFER, true).unwrap();
    assert!(!again.has_invalid_tail());
    assert!(again.stop_reason.is_none());
}

#[test_case(CompressionKind::Lz4 ; "lz4")]
#[test_case(CompressionKind::Zstd ; "zstd")]
fn recovery_counts_no_offsets_for_compressed_empty_batch(compression: CompressionKind) {
    let dir = tempfile::tempdir().unwrap();
    let segment = Segment::new(dir.path(), Offset::new(0));
    let mut writer = SegmentWriter::open(segment.clone(), options(0)).unwrap();
    let empty = RecordBatch::new(Offset::new(0), Vec::new()).with_compression(compression);
    append(&mut writer, &empty);
    assert_eq!(writer.segment().next_offset(), Offset::new(0));
    append(&mut writer, &batch(0, 1000, &["a0", "a1"]));
    assert_eq!(writer.segment().next_offset(), Offset::new(2));
    writer.close().unwrap();

    let reader = open_reader(&segment);
    let found = reader.read_batch(Offset::new(0)).unwrap().unwrap();
    assert_eq!(found.len(), 2);

    let recovery = reader.recover().unwrap();
    assert_eq!(recovery.batches, 2);
    assert_eq!(recovery.next_offset, Offset::new(2));
    assert!(!recovery.has_invalid_tail());
}

#[test]
fn recovery_of_lone_compressed_empty_batch_stays_at_base() {
    let dir = tempfile::tempdir().unwrap();
    let segment = Segment::new(dir.path(), Offset::new(40));
    let mut writer = SegmentWriter::open(segment.clone(), options(0)).unwrap();
    let empty = RecordBatch::new(Offset::new(40), Vec::new()).with_compression(CompressionKind::Zstd);
    append(&mut writer, &empty);
    writer.close().unwrap();

    let recovery = open_reader(&segment).recover().unwrap();
    assert_eq!(recovery.next_offset, Offset::new(40));
}

#[test]
fn verify_only_leaves_files_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let (segment, _) = write_three(dir.path(), 0);
    append_garbage(&segment, b"junk");
    let len = std::fs::metadata(segment.log_path()).unwrap().len();

    let report = repair_segment(&segment, READ_BUFFER, false).unwrap();
    assert!(report.has_invalid_tail());
    assert_eq!(std::fs::metadata(segment.log_path()).unwrap().len(), len);
}

#[test]
fn registry_reopens_multi_segment_topic() {
    let dir = tempfile::tempdir().unwrap();
    let first = Segment::new(dir.path(), Offset::new(0));
    let mut writer = SegmentWriter::open(first, options(0)).unwrap();
    append(&mut writer, &batch(0, 1, &["a", "b", "c", "d", "e"]));
    writer.close().unwrap();

    let second = Segment::new(dir.path(), Offset::new(5));
    let mut writer = SegmentWriter::open(second.clone(), options(0)).unwrap();
    append(&mut writer, &batch(5, 2, &["f", "g", "h"]));
    writer.close().unwrap();
    append_garbage(&second, &[0u8; 11]);

    let registry =
        TopicSegmentRegistry::open(TopicName::new("orders"), dir.path(), Offset::new(0), READ_BUFFER)
            .unwrap();
    assert_eq!(registry.segment_count(), 2);
    assert_eq!(registry.high_water_mark(), Offset::new(8));
    assert_eq!(registry.active_segment().base_offset(), Offset::new(5));
    assert_eq!(
        registry.segment_containing(Offset::new(4)).unwrap().next_offset(),
        Offset::new(5)
    );

    // The torn tail is gone, so appends continue right after offset 7.
    let mut writer = SegmentWriter::open(registry.active_segment(), options(0)).unwrap();
    let position = append(&mut writer, &batch(8, 3, &["i"]));
    assert_eq!(position, open_reader(&second).read_batch_bytes(Offset::new(5)).unwrap().unwrap().len() as u64);
}

#[test]
fn reader_sees_appends_made_after_it_opened() {
    let dir = tempfile::tempdir().unwrap();
    let segment = Segment::new(dir.path(), Offset::new(0));
    let mut writer = SegmentWriter::open(segment.clone(), options(4096)).unwrap();
    let reader = open_reader(&segment);

    assert!(reader.read_batch(Offset::new(0)).unwrap().is_none());
    append(&mut writer, &batch(0, 1, &["late"]));
    let read = reader.read_batch(Offset::new(0)).unwrap().unwrap();
    assert_eq!(payload(&read.records()[0]), b"late");
}

#[test]
fn reader_picks_up_index_created_after_open() {
    let dir = tempfile::tempdir().unwrap();
    let segment = Segment::new(dir.path(), Offset::new(0));
    std::fs::File::create(segment.log_path()).unwrap();
    let reader = open_reader(&segment);

    let mut writer = SegmentWriter::open(segment.clone(), options(0)).unwrap();
    for base in 0..20 {
        append(&mut writer, &batch(base, base, &["p"]));
    }
    let read = reader.read_batch(Offset::new(17)).unwrap().unwrap();
    assert_eq!(read.base_offset(), Offset::new(17));
}

#[test]
fn close_is_idempotent_and_final() {
    let dir = tempfile::tempdir().unwrap();
    let (segment, _) = write_three(dir.path(), 0);

    let reader = open_reader(&segment);
    reader.close();
    reader.close();
    assert!(reader.is_closed());
    assert!(matches!(reader.read_batch(Offset::new(0)), Err(StorageError::Closed)));

    let mut writer = SegmentWriter::open(segment, options(0)).unwrap();
    writer.close().unwrap();
    writer.close().unwrap();
    let b = batch(9, 1, &["x"]);
    let bytes = b.encode(&CodecRegistry::default()).unwrap();
    assert!(matches!(
        writer.append(&bytes, b.base_offset(), b.last_offset()),
        Err(StorageError::Closed)
    ));
}

#[test]
fn should_roll_once_segment_is_full() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = SegmentWriter::open(
        Segment::new(dir.path(), Offset::new(0)),
        SegmentWriterOptions {
            max_segment_bytes: 100,
            ..options(0)
        },
    )
    .unwrap();

    assert!(!writer.should_roll());
    append(&mut writer, &batch(0, 1, &["0123456789"]));
    assert!(!writer.should_roll());
    append(&mut writer, &batch(1, 1, &["0123456789"]));
    assert!(writer.should_roll());
}

#[test]
fn concurrent_readers_share_one_segment() {
    let dir = tempfile::tempdir().unwrap();
    let (segment, _) = write_three(dir.path(), 0);
    let reader = Arc::new(open_reader(&segment));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let reader = Arc::clone(&reader);
            std::thread::spawn(move || {
                for round in 0..50u64 {
                    let offset = Offset::new((round + t) % 9);
                    let batch = reader.read_batch(offset).unwrap().unwrap();
                    assert!(batch.contains(offset));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn arbitrary_batches_read_back_by_offset(
        sizes in prop::collection::vec(1usize..8, 1..20),
        index_interval_bytes in 0u64..512,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let segment = Segment::new(dir.path(), Offset::new(0));
        let mut writer = SegmentWriter::open(segment.clone(), options(index_interval_bytes)).unwrap();

        let mut next = 0u64;
        for size in &sizes {
            let payloads: Vec<String> = (next..next + *size as u64).map(|o| format!("r{o}")).collect();
            let refs: Vec<&str> = payloads.iter().map(String::as_str).collect();
            append(&mut writer, &batch(next, next, &refs));
            next += *size as u64;
        }

        let reader = open_reader(&segment);
        for offset in 0..next {
            let batch = reader.read_batch(Offset::new(offset)).unwrap().unwrap();
            let record = batch.record(Offset::new(offset)).unwrap();
            let expected = format!("r{offset}");
            prop_assert_eq!(payload(record), expected.as_bytes());
        }
        prop_assert!(reader.read_batch(Offset::new(next)).unwrap().is_none());
    }
}
