//! Recover command: open the topic the way an appender would, truncating
//! any invalid tail of the active segment.

use std::path::Path;

use anyhow::{Context, Result, bail};
use segmentlog_config::CommitLogConfig;
use segmentlog_storage::TopicSegmentRegistry;
use segmentlog_types::{Offset, TopicName};

use crate::style::{print_info_table, print_success};

pub fn run(dir: &Path, config: &CommitLogConfig) -> Result<()> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let topic = dir
        .file_name()
        .map(|name| TopicName::new(name.to_string_lossy()))
        .context("topic directory has no name")?;

    let registry =
        TopicSegmentRegistry::open(topic, dir, Offset::ZERO, config.read_buffer_size)
            .with_context(|| format!("failed to recover {}", dir.display()))?;

    let high_water_mark = registry.high_water_mark().to_string();
    let segments = registry.segment_count().to_string();
    let active = registry.active_segment().base_offset().to_string();
    let earliest = registry.earliest_offset().to_string();

    print_success(&format!("Recovered topic '{}'", registry.topic()));
    print_info_table(&[
        ("High-water mark", high_water_mark.as_str()),
        ("Segments", segments.as_str()),
        ("Active segment", active.as_str()),
        ("Earliest offset", earliest.as_str()),
    ]);
    Ok(())
}
