//! CLI command implementations.

pub mod dump;
pub mod recover;
pub mod verify;
pub mod version;

use std::path::Path;

use anyhow::{Result, bail};
use segmentlog_storage::Segment;
use segmentlog_storage::registry::list_segment_bases;

/// Segments found in `dir`, in base-offset order.
fn segments_in(dir: &Path) -> Result<Vec<Segment>> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    Ok(list_segment_bases(dir)?
        .into_iter()
        .map(|base| Segment::new(dir, base))
        .collect())
}
