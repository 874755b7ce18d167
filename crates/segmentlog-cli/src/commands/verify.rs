//! Verify command: checksum every batch, change nothing.

use std::path::Path;

use anyhow::{Result, bail};
use segmentlog_config::CommitLogConfig;
use segmentlog_storage::registry::repair_segment;

use super::segments_in;
use crate::style::{print_error, print_hint, print_success};

pub fn run(dir: &Path, config: &CommitLogConfig) -> Result<()> {
    let segments = segments_in(dir)?;
    if segments.is_empty() {
        print_hint(&format!("No segments in {}", dir.display()));
        return Ok(());
    }

    let mut damaged = 0usize;
    for segment in &segments {
        let recovery = repair_segment(segment, config.read_buffer_size, false)?;
        if recovery.has_invalid_tail() || recovery.stop_reason.is_some() {
            damaged += 1;
            let reason = recovery
                .stop_reason
                .as_ref()
                .map_or_else(|| "incomplete batch".to_string(), ToString::to_string);
            print_error(&format!(
                "segment {}: {} valid bytes of {} ({reason})",
                segment.base_offset(),
                recovery.valid_len,
                recovery.log_len
            ));
        } else {
            print_success(&format!(
                "segment {}: {} batches, offsets up to {}",
                segment.base_offset(),
                recovery.batches,
                recovery.next_offset
            ));
        }
    }

    if damaged > 0 {
        print_hint("Run `segmentlog recover` to truncate a damaged active segment");
        bail!("{damaged} of {} segments failed verification", segments.len());
    }
    Ok(())
}
