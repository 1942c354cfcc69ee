//! Basename-matched content diff between a project component and its cached
//! counterpart.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;

use crate::component::Component;

use super::compare::files_differ;

/// A project/cache file pair whose content differs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePair {
    pub project_path: PathBuf,
    pub cache_path: PathBuf,
}

/// Compare the two components' files by basename and return the pairs whose
/// content differs.
///
/// Only basenames present on both sides are compared; a file that exists on
/// one side only is not reported. For metadata-only components the
/// descriptor comparison alone decides.
pub fn diff_components(project: &Component, cache: &Component) -> Result<Vec<FilePair>> {
    let project_index = index_by_basename(project)?;
    let cache_index = index_by_basename(cache)?;

    let mut pairs = Vec::new();
    for (basename, project_path) in &project_index {
        if let Some(cache_path) = cache_index.get(basename) {
            if files_differ(project_path, cache_path)? {
                pairs.push(FilePair {
                    project_path: project_path.clone(),
                    cache_path: cache_path.clone(),
                });
            }
        }
    }
    Ok(pairs)
}

fn index_by_basename(component: &Component) -> Result<HashMap<String, PathBuf>> {
    let mut index = HashMap::new();
    for path in component.file_paths()? {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            index.insert(name.to_string(), path.clone());
        }
    }
    Ok(index)
}
