//! Local/remote diff operations over a loaded metadata cache.

pub mod compare;
pub mod component;
pub mod directory;
pub mod walker;

pub use compare::files_differ;
pub use component::{diff_components, FilePair};
pub use directory::{CommonDirDirectoryDiffer, DirectoryDiffResults, TimestampFileProperties};
pub use walker::{count_files, walk, FileVisit};

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::cache::MetadataCacheResult;

/// Content diff of the two common-root trees of a loaded cache.
pub fn diff_folder(result: &MetadataCacheResult) -> Result<DirectoryDiffResults> {
    let local_root = result.project.base_directory.join(&result.project.common_root);
    let remote_root = result.cache.base_directory.join(&result.cache.common_root);
    CommonDirDirectoryDiffer.diff(&local_root, &remote_root)
}

/// Diff a multi-file selection against the cached components that carry a
/// file of the same basename. Selected files with no cached counterpart are
/// silently skipped.
pub fn diff_multiple_files(
    result: &MetadataCacheResult,
    selected: &[PathBuf],
) -> Result<DirectoryDiffResults> {
    let mut different = HashSet::new();
    for local_path in selected {
        let Some(cache_path) = find_matching_file(result, local_path)? else {
            continue;
        };
        if files_differ(local_path, &cache_path)? {
            different.insert(TimestampFileProperties {
                local_rel_path: relativize(&result.project.base_directory, local_path),
                remote_rel_path: relativize(&result.cache.base_directory, &cache_path),
                local_last_modified_date: None,
                remote_last_modified_date: None,
            });
        }
    }
    Ok(DirectoryDiffResults {
        different,
        local_root: result.project.base_directory.clone(),
        remote_root: result.cache.base_directory.clone(),
        scanned_local: Some(selected.len()),
        scanned_remote: Some(result.cache.components.len()),
    })
}

/// The cached counterpart of one local file, matched by basename across the
/// cached components' file sets.
pub fn diff_one_file(result: &MetadataCacheResult, local_path: &Path) -> Result<Option<FilePair>> {
    Ok(find_matching_file(result, local_path)?.map(|cache_path| FilePair {
        project_path: local_path.to_path_buf(),
        cache_path,
    }))
}

fn find_matching_file(
    result: &MetadataCacheResult,
    local_path: &Path,
) -> Result<Option<PathBuf>> {
    let Some(basename) = local_path.file_name() else {
        return Ok(None);
    };
    for component in &result.cache.components {
        for path in component.file_paths()? {
            if path.file_name() == Some(basename) {
                return Ok(Some(path));
            }
        }
    }
    Ok(None)
}

/// Path relative to `base`, or the full path when it lies outside `base`.
pub(crate) fn relativize(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}
