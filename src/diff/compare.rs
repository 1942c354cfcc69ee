//! Byte-exact file comparison.

use std::fs;
use std::io;
use std::path::Path;

/// True iff the two files' byte content differs.
///
/// Both files are read fully — fine for source files, not for large
/// binaries. A missing or unreadable file is a hard error that aborts the
/// surrounding diff pass.
pub fn files_differ(a: &Path, b: &Path) -> io::Result<bool> {
    let left = fs::read(a)?;
    let right = fs::read(b)?;
    Ok(left != right)
}
