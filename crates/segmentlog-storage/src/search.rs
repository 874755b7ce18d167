//! Closest-match-not-exceeding search over a sorted, fixed-width index.

/// Finds the entry with the greatest key `<= target`.
///
/// `read_entry(i)` must return the `i`-th entry of a sequence of
/// `entry_count` entries sorted by `key` ascending. An exact match returns
/// immediately; otherwise the best candidate with a smaller key is kept.
///
/// Returns `Ok(None)` when the index is empty or every key exceeds the
/// target, which callers read as "start scanning from position 0".
pub fn search<E, Err, R, K>(
    entry_count: u64,
    mut read_entry: R,
    key: K,
    target: u64,
) -> Result<Option<E>, Err>
where
    R: FnMut(u64) -> Result<E, Err>,
    K: Fn(&E) -> u64,
{
    let mut low = 0u64;
    let mut high = entry_count;
    let mut best = None;

    // Invariant: every entry below `low` has key < target, every entry at
    // or above `high` has key > target.
    while low < high {
        let mid = low + (high - low) / 2;
        let entry = read_entry(mid)?;
        let entry_key = key(&entry);

        if entry_key == target {
            return Ok(Some(entry));
        }

        if entry_key < target {
            best = Some(entry);
            low = mid + 1;
        } else {
            high = mid;
        }
    }

    Ok(best)
}
