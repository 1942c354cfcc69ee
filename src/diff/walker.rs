//! Recursive file visitor.
//!
//! Directories are descended but never yielded. Visit order is
//! directory-listing order — callers collect into sets, so ordering affects
//! only performance. Any walk or callback error aborts the whole pass.

use std::path::{Path, PathBuf};

use anyhow::Result;
use walkdir::WalkDir;

/// One visited file.
#[derive(Debug, Clone)]
pub struct FileVisit {
    /// Base name of the file.
    pub filename: String,
    /// Absolute directory containing the file.
    pub subdirectory: PathBuf,
    /// Path relative to the walk root.
    pub relative_path: PathBuf,
}

/// Visit every file under `root`.
pub fn walk<F>(root: &Path, mut on_file: F) -> Result<()>
where
    F: FnMut(&FileVisit) -> Result<()>,
{
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative_path = entry.path().strip_prefix(root)?.to_path_buf();
        let visit = FileVisit {
            filename: entry.file_name().to_string_lossy().into_owned(),
            subdirectory: entry
                .path()
                .parent()
                .unwrap_or(root)
                .to_path_buf(),
            relative_path,
        };
        on_file(&visit)?;
    }
    Ok(())
}

/// Count of files under `root`.
pub fn count_files(root: &Path) -> Result<usize> {
    let mut count = 0;
    walk(root, |_| {
        count += 1;
        Ok(())
    })?;
    Ok(count)
}
