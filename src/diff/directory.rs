//! Common-directory tree diff — the content-based conflict strategy.
//!
//! Walks the remote tree and compares every file that also exists locally
//! at the same relative path. No metadata shortcuts: every shared file is
//! read and compared in full.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Result;

use super::compare::files_differ;
use super::walker::walk;

/// One differing file pair. The timestamp fields are filled in by the
/// timestamp-gated strategy and absent for the pure content strategy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimestampFileProperties {
    pub local_rel_path: String,
    pub remote_rel_path: String,
    pub local_last_modified_date: Option<String>,
    pub remote_last_modified_date: Option<String>,
}

/// Terminal output of a diff pass; immutable once produced.
///
/// Scan counts are reported by the walking strategy and absent for the
/// correlation-driven one.
#[derive(Debug, Clone, Default)]
pub struct DirectoryDiffResults {
    pub different: HashSet<TimestampFileProperties>,
    pub local_root: PathBuf,
    pub remote_root: PathBuf,
    pub scanned_local: Option<usize>,
    pub scanned_remote: Option<usize>,
}

pub struct CommonDirDirectoryDiffer;

impl CommonDirDirectoryDiffer {
    pub fn diff(&self, local_root: &Path, remote_root: &Path) -> Result<DirectoryDiffResults> {
        let mut local_files = HashSet::new();
        walk(local_root, |visit| {
            local_files.insert(visit.relative_path.clone());
            Ok(())
        })?;

        let mut different = HashSet::new();
        let mut scanned_remote = 0usize;
        walk(remote_root, |visit| {
            scanned_remote += 1;
            if local_files.contains(&visit.relative_path) {
                let local_file = local_root.join(&visit.relative_path);
                let remote_file = remote_root.join(&visit.relative_path);
                if files_differ(&local_file, &remote_file)? {
                    let rel = visit.relative_path.to_string_lossy().into_owned();
                    different.insert(TimestampFileProperties {
                        local_rel_path: rel.clone(),
                        remote_rel_path: rel,
                        local_last_modified_date: None,
                        remote_last_modified_date: None,
                    });
                }
            }
            Ok(())
        })?;

        Ok(DirectoryDiffResults {
            different,
            local_root: local_root.to_path_buf(),
            remote_root: remote_root.to_path_buf(),
            scanned_local: Some(local_files.len()),
            scanned_remote: Some(scanned_remote),
        })
    }
}
