//! Dump command: batch headers (and optionally records) of every segment.

use std::path::Path;

use anyhow::Result;
use segmentlog_config::CommitLogConfig;
use segmentlog_storage::{CodecRegistry, Segment, SegmentReader};
use segmentlog_types::Offset;

use super::segments_in;
use crate::style::{
    SemanticStyle, batch_table, print_hint, print_labeled, print_spacer, print_warn,
};

/// Longest payload prefix printed per record.
const PAYLOAD_PREVIEW: usize = 64;

pub fn run(dir: &Path, config: &CommitLogConfig, records: bool, only: Option<u64>) -> Result<()> {
    let codecs = CodecRegistry::with_zstd_level(config.zstd_level);
    let segments: Vec<Segment> = segments_in(dir)?
        .into_iter()
        .filter(|s| only.is_none_or(|base| s.base_offset() == Offset::new(base)))
        .collect();

    if segments.is_empty() {
        print_hint(&format!("No segments in {}", dir.display()));
        return Ok(());
    }

    for segment in segments {
        dump_segment(segment, codecs, config.read_buffer_size, records)?;
    }
    Ok(())
}

fn dump_segment(
    segment: Segment,
    codecs: CodecRegistry,
    read_buffer_size: usize,
    records: bool,
) -> Result<()> {
    let path = segment.log_path().display().to_string();
    let reader = SegmentReader::open(segment, codecs, read_buffer_size)?;
    let log_len = reader.log_len()?;

    println!("{}", format!("Segment {}", reader.base_offset()).header());
    print_labeled("File", &path.code());
    print_labeled("Bytes", &log_len.to_string());

    let mut scanner = reader.scanner_at(0)?;
    let mut rows = Vec::new();
    let mut decoded = Vec::new();
    let stop = loop {
        match scanner.next_raw() {
            Ok(Some(raw)) => {
                rows.push(vec![
                    raw.position.to_string(),
                    raw.header.base_offset.to_string(),
                    raw.header.last_offset.to_string(),
                    raw.record_count(&codecs)?.to_string(),
                    raw.header.base_timestamp.to_string(),
                    raw.header.compression.to_string(),
                    raw.bytes.len().to_string(),
                ]);
                if records {
                    decoded.push(raw.decode(&codecs)?);
                }
            }
            Ok(None) => break None,
            // A torn tail is reported below as trailing bytes.
            Err(e) if e.is_truncation() => break None,
            Err(e) => break Some(e),
        }
    };
    let valid_len = scanner.position();
    reader.close();

    println!("{}", batch_table(&rows));

    for batch in &decoded {
        for record in batch.records() {
            let payload = record.payload();
            let preview = String::from_utf8_lossy(&payload[..payload.len().min(PAYLOAD_PREVIEW)]);
            println!(
                "  {} {} {}",
                format!("@{}", record.offset()).info(),
                record.timestamp().to_string().muted(),
                preview
            );
        }
    }

    if let Some(e) = stop {
        print_warn(&format!("scan stopped at byte {valid_len}: {e}"));
    } else if valid_len < log_len {
        print_warn(&format!(
            "{} trailing bytes after byte {valid_len} (incomplete batch)",
            log_len - valid_len
        ));
    }
    print_spacer();
    Ok(())
}
