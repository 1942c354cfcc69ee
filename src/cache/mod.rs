//! Metadata cache service — retrieves remote components into a per-identity
//! cache directory and produces the paired local/remote contexts every
//! downstream diff consumes.
//!
//! The cache directory is keyed by org username and cleared unconditionally
//! before every retrieve; concurrent retrieves for the same identity are not
//! guarded (single-caller assumption).

pub mod props;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::component::manifest::PackageManifest;
use crate::component::resolver::ComponentResolver;
use crate::component::{Component, ComponentSet};
use crate::observability::LatencyTracker;
use crate::retrieve::{RetrieveClient, RetrieveOperation, RetrieveOutcome, RetrieveRequest};

use props::{FileProperties, PropertyFile};

/// Classification of the user's original selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PathType {
    Folder,
    Individual,
    Manifest,
    Unknown,
}

/// A provenance-tagged component collection: one per side of a diff.
#[derive(Debug, Clone)]
pub struct MetadataContext {
    pub base_directory: PathBuf,
    /// Relative path shared by all members, possibly empty.
    pub common_root: String,
    pub components: Vec<Component>,
}

/// Everything a cache load produces; discarded once the caller has
/// consumed it.
#[derive(Debug, Clone)]
pub struct MetadataCacheResult {
    pub selected_path: PathBuf,
    pub selected_type: PathType,
    pub cache: MetadataContext,
    pub cache_prop_path: PathBuf,
    pub properties: Vec<FileProperties>,
    pub project: MetadataContext,
}

pub struct MetadataCacheService {
    retriever: Arc<dyn RetrieveClient>,
    resolver: ComponentResolver,
    username: String,
    cache_root: PathBuf,
    api_version: String,
    // Per-operation state, set by initialize().
    component_path: PathBuf,
    project_path: PathBuf,
    is_manifest: bool,
    source_components: ComponentSet,
}

impl MetadataCacheService {
    pub fn new(
        retriever: Arc<dyn RetrieveClient>,
        resolver: ComponentResolver,
        username: impl Into<String>,
        cache_root: PathBuf,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            retriever,
            resolver,
            username: username.into(),
            cache_root,
            api_version: api_version.into(),
            component_path: PathBuf::new(),
            project_path: PathBuf::new(),
            is_manifest: false,
            source_components: ComponentSet::new(),
        }
    }

    /// Pure configuration for one load operation; no I/O happens here.
    pub fn initialize(&mut self, component_path: &Path, project_path: &Path, is_manifest: bool) {
        self.component_path = component_path.to_path_buf();
        self.project_path = project_path.to_path_buf();
        self.is_manifest = is_manifest;
        self.source_components = ComponentSet::new();
    }

    /// Cache directory for this identity.
    pub fn cache_path(&self) -> PathBuf {
        self.cache_root.join(&self.username)
    }

    /// Resolve the configured selector into local components, scoped to the
    /// project's package directories. Empty when nothing resolves.
    pub async fn get_source_components(&mut self) -> Result<ComponentSet> {
        let resolver = self.resolver.clone();
        let selector = self.component_path.clone();
        let is_manifest = self.is_manifest;
        let components = tokio::task::spawn_blocking(move || {
            if is_manifest {
                let manifest = PackageManifest::load(&selector)?;
                resolver.resolve_manifest(&manifest)
            } else {
                resolver.resolve_path(&selector)
            }
        })
        .await
        .context("component resolution task panicked")??;
        self.source_components = components.clone();
        Ok(components)
    }

    /// Clear the identity's cache directory (destructive, never merged) and
    /// start a retrieve scoped to the resolved components.
    pub async fn create_retrieve_operation(
        &self,
        components: &ComponentSet,
    ) -> Result<RetrieveOperation> {
        let cache_path = self.cache_path();
        clear_directory(&cache_path).await?;
        let request = RetrieveRequest {
            username: self.username.clone(),
            members: components.member_strings(),
            output_dir: cache_path,
            api_version: self.api_version.clone(),
        };
        self.retriever.retrieve(&request).await
    }

    /// Selector resolution → retrieve → poll-to-completion → result
    /// assembly. `None` when the selector resolves to no components.
    pub async fn load_cache(
        &mut self,
        component_path: &Path,
        project_path: &Path,
        is_manifest: bool,
    ) -> Result<Option<MetadataCacheResult>> {
        let tracker = LatencyTracker::start("cache.load");
        let result = self
            .load_cache_inner(component_path, project_path, is_manifest)
            .await;
        tracker.finish();
        result
    }

    async fn load_cache_inner(
        &mut self,
        component_path: &Path,
        project_path: &Path,
        is_manifest: bool,
    ) -> Result<Option<MetadataCacheResult>> {
        self.initialize(component_path, project_path, is_manifest);
        let components = self.get_source_components().await?;
        if components.is_empty() {
            debug!(
                selector = %self.component_path.display(),
                "selection resolved to no components"
            );
            return Ok(None);
        }
        let operation = self.create_retrieve_operation(&components).await?;
        let outcome = operation.wait().await?;
        self.process_results(&outcome)
    }

    /// Extract server properties from a completed retrieve, persist them to
    /// the side-file, compute both common roots, and classify the selector.
    /// `None` for an empty or failed outcome.
    pub fn process_results(
        &self,
        outcome: &RetrieveOutcome,
    ) -> Result<Option<MetadataCacheResult>> {
        if !outcome.success || outcome.components.is_empty() {
            return Ok(None);
        }
        let cache_path = self.cache_path();
        let property_file = PropertyFile {
            component_path: self.component_path.clone(),
            file_properties: outcome.file_properties.clone(),
        };
        let cache_prop_path = property_file.save(&cache_path)?;
        let cache_common = find_longest_common_dir(&outcome.components, &cache_path);
        let project_common =
            find_longest_common_dir(self.source_components.components(), &self.project_path);
        let selected_type = classify_selector(&self.component_path, self.is_manifest);
        info!(
            username = %self.username,
            components = outcome.components.len(),
            cache_root = %cache_common,
            project_root = %project_common,
            "metadata cache loaded"
        );
        Ok(Some(MetadataCacheResult {
            selected_path: self.component_path.clone(),
            selected_type,
            cache: MetadataContext {
                base_directory: cache_path,
                common_root: cache_common,
                components: outcome.components.clone(),
            },
            cache_prop_path,
            properties: outcome.file_properties.clone(),
            project: MetadataContext {
                base_directory: self.project_path.clone(),
                common_root: project_common,
                components: self.source_components.components().to_vec(),
            },
        }))
    }

    /// Delete the identity's cache directory entirely.
    pub async fn clear_cache(&self) -> Result<()> {
        let cache_path = self.cache_path();
        match tokio::fs::remove_dir_all(&cache_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("failed to clear cache {}", cache_path.display())),
        }
    }
}

async fn clear_directory(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("failed to clear {}", path.display()));
        }
    }
    tokio::fs::create_dir_all(path)
        .await
        .with_context(|| format!("failed to create {}", path.display()))
}

/// Longest common directory prefix of the components' locations relative to
/// `base_dir`.
///
/// A raw byte-prefix match against the first path, shrunk at the first
/// mismatch with each subsequent path; only a trailing separator is trimmed,
/// so the result can end mid-segment when sibling directory names share a
/// prefix.
pub fn find_longest_common_dir(components: &[Component], base_dir: &Path) -> String {
    if components.is_empty() {
        return String::new();
    }
    if components.len() == 1 {
        return relative_dir(&components[0], base_dir);
    }
    let paths: Vec<String> = components
        .iter()
        .map(|c| relative_dir(c, base_dir))
        .collect();
    let baseline = paths[0].as_bytes();
    let mut shortest = baseline.len();
    for sample in &paths[1..] {
        let sample = sample.as_bytes();
        shortest = shortest.min(sample.len());
        for position in 0..shortest {
            if baseline[position] != sample[position] {
                shortest = position;
                break;
            }
        }
    }
    let prefix = String::from_utf8_lossy(&baseline[..shortest]);
    prefix
        .strip_suffix(std::path::MAIN_SEPARATOR)
        .unwrap_or(&prefix)
        .to_string()
}

/// Component directory relative to `base_dir`; empty when the component has
/// no paths or lies outside the base.
fn relative_dir(component: &Component, base_dir: &Path) -> String {
    component
        .directory()
        .and_then(|dir| dir.strip_prefix(base_dir).ok())
        .map(|rel| rel.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn classify_selector(path: &Path, is_manifest: bool) -> PathType {
    if is_manifest {
        return PathType::Manifest;
    }
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => PathType::Folder,
        Ok(_) => PathType::Individual,
        Err(_) => PathType::Unknown,
    }
}
