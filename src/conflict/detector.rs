//! Timestamp-gated conflict detection.
//!
//! The stored timestamp acts as a fast path: when it matches the remote
//! modification stamp the pair is trusted to be in sync and no bytes are
//! read. Every other pair gets a full content diff.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::cache::MetadataCacheResult;
use crate::diff::component::diff_components;
use crate::diff::directory::{DirectoryDiffResults, TimestampFileProperties};
use crate::diff::relativize;
use crate::storage::{Storage, TimestampKey};

use super::correlator::correlate_results;

pub struct TimestampConflictDetector {
    storage: Arc<Storage>,
}

impl TimestampConflictDetector {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Reduce a cache result to the set of genuinely conflicting files,
    /// expressed relative to each side's base directory. `None` input means
    /// nothing was retrieved and yields an empty result.
    pub async fn create_diffs(
        &self,
        org_username: &str,
        result: Option<&MetadataCacheResult>,
    ) -> Result<DirectoryDiffResults> {
        let Some(result) = result else {
            return Ok(DirectoryDiffResults::default());
        };
        let mut diffs = DirectoryDiffResults {
            local_root: result
                .project
                .base_directory
                .join(&result.project.common_root),
            remote_root: result.cache.base_directory.join(&result.cache.common_root),
            ..Default::default()
        };
        let correlated = correlate_results(
            &result.cache.components,
            &result.properties,
            &result.project.components,
        );
        let project_path = result.project.base_directory.to_string_lossy().into_owned();

        for pair in correlated {
            let key = TimestampKey {
                org_username: org_username.to_string(),
                project_path: project_path.clone(),
                type_name: pair.project_component.type_name.clone(),
                full_name: pair.project_component.full_name.clone(),
            };
            let stored = self.storage.get_timestamp(&key).await?;
            if stored.as_deref() == Some(pair.last_modified_date.as_str()) {
                debug!(
                    component = %pair.project_component.key(),
                    "timestamps match, skipping content diff"
                );
                continue;
            }
            let project_component = pair.project_component.clone();
            let cache_component = pair.cache_component.clone();
            let file_pairs = tokio::task::spawn_blocking(move || {
                diff_components(&project_component, &cache_component)
            })
            .await
            .context("component diff task panicked")??;
            for file_pair in file_pairs {
                diffs.different.insert(TimestampFileProperties {
                    local_rel_path: relativize(
                        &result.project.base_directory,
                        &file_pair.project_path,
                    ),
                    remote_rel_path: relativize(
                        &result.cache.base_directory,
                        &file_pair.cache_path,
                    ),
                    local_last_modified_date: stored.clone(),
                    remote_last_modified_date: Some(pair.last_modified_date.clone()),
                });
            }
        }
        Ok(diffs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MetadataContext, PathType};
    use crate::component::Component;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn write_file(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn class(base: &Path, name: &str, body: &str) -> Component {
        let content = base.join("classes").join(format!("{name}.cls"));
        write_file(&content, body);
        Component {
            full_name: name.to_string(),
            type_name: "ApexClass".to_string(),
            content: Some(content),
            xml: None,
            parent: None,
        }
    }

    fn cache_result(
        project_base: &Path,
        cache_base: &Path,
        project: Vec<Component>,
        cache: Vec<Component>,
        stamp: &str,
    ) -> MetadataCacheResult {
        let properties = cache
            .iter()
            .map(|c| crate::cache::props::FileProperties {
                full_name: c.full_name.clone(),
                type_name: c.type_name.clone(),
                last_modified_date: stamp.to_string(),
                id: None,
                file_name: None,
                created_by_name: None,
                last_modified_by_name: None,
            })
            .collect();
        MetadataCacheResult {
            selected_path: PathBuf::from("classes"),
            selected_type: PathType::Folder,
            cache: MetadataContext {
                base_directory: cache_base.to_path_buf(),
                common_root: "classes".to_string(),
                components: cache,
            },
            cache_prop_path: cache_base.join("prop/file-props.json"),
            properties,
            project: MetadataContext {
                base_directory: project_base.to_path_buf(),
                common_root: "classes".to_string(),
                components: project,
            },
        }
    }

    async fn storage_in(tmp: &TempDir) -> Arc<Storage> {
        Arc::new(Storage::new(&tmp.path().join("orgd.db")).await.unwrap())
    }

    #[tokio::test]
    async fn missing_result_is_an_empty_diff() {
        let tmp = TempDir::new().unwrap();
        let detector = TimestampConflictDetector::new(storage_in(&tmp).await);
        let diffs = detector.create_diffs("user@example.com", None).await.unwrap();
        assert!(diffs.different.is_empty());
    }

    #[tokio::test]
    async fn changed_bytes_without_a_stored_stamp_conflict() {
        let tmp = TempDir::new().unwrap();
        let project_base = tmp.path().join("project");
        let cache_base = tmp.path().join("cache");
        let project = vec![class(&project_base, "Foo", "local body")];
        let cache = vec![class(&cache_base, "Foo", "remote body")];
        let result = cache_result(
            &project_base,
            &cache_base,
            project,
            cache,
            "2024-05-05T00:00:00.000Z",
        );

        let detector = TimestampConflictDetector::new(storage_in(&tmp).await);
        let diffs = detector
            .create_diffs("user@example.com", Some(&result))
            .await
            .unwrap();

        assert_eq!(diffs.different.len(), 1);
        let entry = diffs.different.iter().next().unwrap();
        assert_eq!(entry.local_rel_path, "classes/Foo.cls");
        assert_eq!(entry.remote_rel_path, "classes/Foo.cls");
        assert_eq!(entry.local_last_modified_date, None);
        assert_eq!(
            entry.remote_last_modified_date.as_deref(),
            Some("2024-05-05T00:00:00.000Z")
        );
    }

    #[tokio::test]
    async fn matching_stored_stamp_skips_the_content_diff() {
        let tmp = TempDir::new().unwrap();
        let project_base = tmp.path().join("project");
        let cache_base = tmp.path().join("cache");
        // Bytes differ, but the stored stamp says we already synced this
        // revision, so no conflict may be reported.
        let project = vec![class(&project_base, "Foo", "local body")];
        let cache = vec![class(&cache_base, "Foo", "remote body")];
        let stamp = "2024-05-05T00:00:00.000Z";
        let result = cache_result(&project_base, &cache_base, project, cache, stamp);

        let storage = storage_in(&tmp).await;
        storage
            .set_timestamp(
                &TimestampKey {
                    org_username: "user@example.com".to_string(),
                    project_path: project_base.to_string_lossy().into_owned(),
                    type_name: "ApexClass".to_string(),
                    full_name: "Foo".to_string(),
                },
                stamp,
            )
            .await
            .unwrap();

        let detector = TimestampConflictDetector::new(storage);
        let diffs = detector
            .create_diffs("user@example.com", Some(&result))
            .await
            .unwrap();
        assert!(diffs.different.is_empty());
    }

    #[tokio::test]
    async fn stale_stored_stamp_still_diffs_and_reports_both_stamps() {
        let tmp = TempDir::new().unwrap();
        let project_base = tmp.path().join("project");
        let cache_base = tmp.path().join("cache");
        let project = vec![class(&project_base, "Foo", "same body")];
        let cache = vec![class(&cache_base, "Foo", "same body")];
        let result = cache_result(
            &project_base,
            &cache_base,
            project,
            cache,
            "2024-06-06T00:00:00.000Z",
        );

        let storage = storage_in(&tmp).await;
        storage
            .set_timestamp(
                &TimestampKey {
                    org_username: "user@example.com".to_string(),
                    project_path: project_base.to_string_lossy().into_owned(),
                    type_name: "ApexClass".to_string(),
                    full_name: "Foo".to_string(),
                },
                "2024-01-01T00:00:00.000Z",
            )
            .await
            .unwrap();

        let detector = TimestampConflictDetector::new(storage);
        let diffs = detector
            .create_diffs("user@example.com", Some(&result))
            .await
            .unwrap();
        // Stamps disagreed so the diff ran, but the bytes matched.
        assert!(diffs.different.is_empty());
    }
}
