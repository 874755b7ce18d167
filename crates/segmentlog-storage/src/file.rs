//! Positional file reads.
//!
//! Readers share a file handle with other readers and with the appending
//! writer, so they never move the file cursor: every read names its position.

use std::fs::File;
use std::io;

/// Reads at most `buf.len()` bytes at `position`, returning the count read.
pub(crate) fn read_at(file: &File, buf: &mut [u8], position: u64) -> io::Result<usize> {
    // pread on Unix: no shared cursor
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileExt;
        file.read_at(buf, position)
    }

    #[cfg(not(unix))]
    {
        use std::os::windows::fs::FileExt;
        file.seek_read(buf, position)
    }
}

/// Fills as much of `buf` as the file holds from `position` onward.
///
/// Returns fewer than `buf.len()` bytes only at end of file.
pub(crate) fn read_full_at(file: &File, buf: &mut [u8], position: u64) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match read_at(file, &mut buf[filled..], position + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Fills `buf` exactly from `position`, failing with `UnexpectedEof` if the
/// file is too short.
pub(crate) fn read_exact_at(file: &File, buf: &mut [u8], position: u64) -> io::Result<()> {
    let n = read_full_at(file, buf, position)?;
    if n < buf.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("wanted {} bytes at {position}, file holds {n}", buf.len()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn positional_reads_do_not_disturb_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        File::create(&path).unwrap().write_all(b"0123456789").unwrap();
        let file = File::open(&path).unwrap();

        let mut a = [0u8; 3];
        let mut b = [0u8; 3];
        read_exact_at(&file, &mut a, 6).unwrap();
        read_exact_at(&file, &mut b, 1).unwrap();
        assert_eq!(&a, b"678");
        assert_eq!(&b, b"123");
    }

    #[test]
    fn short_file_reports_partial_fill() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        File::create(&path).unwrap().write_all(b"abc").unwrap();
        let file = File::open(&path).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(read_full_at(&file, &mut buf, 1).unwrap(), 2);
        let err = read_exact_at(&file, &mut buf, 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
