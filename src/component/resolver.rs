//! Local source resolution — maps files on disk to typed components.
//!
//! A compact, data-driven registry replaces a full metadata catalog: flat
//! suffix types, decomposed custom-object children, and bundle directories.
//! Unrecognized files are skipped silently; a selector that resolves to
//! nothing yields an empty set, not an error.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;
use walkdir::WalkDir;

use super::manifest::PackageManifest;
use super::{Component, ComponentKey, ComponentSet};

const META_SUFFIX: &str = "-meta.xml";
const OBJECTS_DIR: &str = "objects";
const AURA_DIR: &str = "aura";
const LWC_DIR: &str = "lwc";

/// Flat types: file suffix → metadata type.
const SUFFIX_TYPES: &[(&str, &str)] = &[
    ("cls", "ApexClass"),
    ("trigger", "ApexTrigger"),
    ("page", "ApexPage"),
    ("component", "ApexComponent"),
    ("resource", "StaticResource"),
    ("app", "CustomApplication"),
    ("layout", "Layout"),
    ("permissionset", "PermissionSet"),
];

/// Decomposed children under `objects/<Parent>/`: (subdirectory, descriptor
/// suffix, metadata type).
const CHILD_TYPES: &[(&str, &str, &str)] = &[
    ("fields", "field", "CustomField"),
    ("listViews", "listView", "ListView"),
];

/// Resolves selector paths and manifests into [`ComponentSet`]s, scoped to
/// the project's package directories.
#[derive(Debug, Clone)]
pub struct ComponentResolver {
    package_dirs: Vec<PathBuf>,
}

impl ComponentResolver {
    /// `package_dirs` are project-relative; directories that do not exist
    /// are skipped at scan time.
    pub fn new(project_dir: &Path, package_dirs: &[String]) -> Self {
        Self {
            package_dirs: package_dirs.iter().map(|d| project_dir.join(d)).collect(),
        }
    }

    /// Resolver over a single absolute directory (e.g. a retrieve output).
    pub fn for_directory(dir: &Path) -> Self {
        Self {
            package_dirs: vec![dir.to_path_buf()],
        }
    }

    /// Resolve a selector path: a file maps to its component, a directory to
    /// every recognized component beneath it. A missing path is a hard error.
    pub fn resolve_path(&self, path: &Path) -> Result<ComponentSet> {
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("selection {} does not exist", path.display()))?;
        let mut set = ComponentSet::new();
        if metadata.is_dir() {
            if let Some((root, type_name)) = find_bundle_root(path) {
                if let Some(component) = resolve_bundle(&root, type_name) {
                    set.add(component);
                    return Ok(set);
                }
            }
            self.scan_dir(path, &mut set)?;
        } else if let Some(component) = self.resolve_file(path) {
            set.add(component);
        }
        Ok(set)
    }

    /// Resolve a manifest against the package directories. Children are
    /// selected when either they or their parent are named.
    pub fn resolve_manifest(&self, manifest: &PackageManifest) -> Result<ComponentSet> {
        let mut scanned = ComponentSet::new();
        for dir in &self.package_dirs {
            if !dir.is_dir() {
                debug!(dir = %dir.display(), "package directory missing — skipped");
                continue;
            }
            self.scan_dir(dir, &mut scanned)?;
        }
        let mut set = ComponentSet::new();
        for component in scanned.into_components() {
            let selected = manifest.contains(&component.type_name, &component.full_name)
                || component
                    .parent
                    .as_ref()
                    .is_some_and(|p| manifest.contains(&p.type_name, &p.full_name));
            if selected {
                set.add(component);
            }
        }
        Ok(set)
    }

    fn scan_dir(&self, dir: &Path, set: &mut ComponentSet) -> Result<()> {
        let mut entries = WalkDir::new(dir).into_iter();
        while let Some(entry) = entries.next() {
            let entry = entry.with_context(|| format!("failed to scan {}", dir.display()))?;
            let path = entry.path();
            if entry.file_type().is_dir() {
                let parent_name = path
                    .parent()
                    .and_then(|p| p.file_name())
                    .and_then(|n| n.to_str());
                let bundle_type = match parent_name {
                    Some(AURA_DIR) => Some("AuraDefinitionBundle"),
                    Some(LWC_DIR) => Some("LightningComponentBundle"),
                    _ => None,
                };
                if let Some(type_name) = bundle_type {
                    if let Some(component) = resolve_bundle(path, type_name) {
                        set.add(component);
                    }
                    entries.skip_current_dir();
                }
                continue;
            }
            if let Some(component) = self.resolve_file(path) {
                set.add(component);
            }
        }
        Ok(())
    }

    /// Map one file to its component. Source and descriptor paths both
    /// resolve to the same component.
    fn resolve_file(&self, path: &Path) -> Option<Component> {
        if let Some((root, type_name)) = find_bundle_root(path) {
            return resolve_bundle(&root, type_name);
        }
        let file_name = path.file_name()?.to_str()?;
        let logical = file_name.strip_suffix(META_SUFFIX).unwrap_or(file_name);
        let (stem, suffix) = logical.rsplit_once('.')?;
        if let Some(component) = resolve_object_member(path, stem, suffix) {
            return Some(component);
        }
        let type_name = SUFFIX_TYPES
            .iter()
            .find(|(s, _)| *s == suffix)
            .map(|(_, t)| *t)?;
        let dir = path.parent()?;
        let content = dir.join(logical);
        let xml = dir.join(format!("{logical}{META_SUFFIX}"));
        Some(Component {
            full_name: stem.to_string(),
            type_name: type_name.to_string(),
            content: content.exists().then_some(content),
            xml: xml.exists().then_some(xml),
            parent: None,
        })
    }
}

/// Decomposed object members: the object descriptor itself, or a child
/// descriptor under a recognized subdirectory.
fn resolve_object_member(path: &Path, stem: &str, suffix: &str) -> Option<Component> {
    let parent_dir = path.parent()?;
    let parent_name = parent_dir.file_name()?.to_str()?;
    let grandparent = parent_dir.parent()?;
    let grandparent_name = grandparent.file_name()?.to_str()?;

    // objects/<Parent>/<Parent>.object-meta.xml
    if suffix == "object" && grandparent_name == OBJECTS_DIR {
        return Some(Component {
            full_name: stem.to_string(),
            type_name: "CustomObject".to_string(),
            content: None,
            xml: Some(parent_dir.join(format!("{stem}.object{META_SUFFIX}"))),
            parent: None,
        });
    }

    // objects/<Parent>/<childDir>/<Name>.<childSuffix>-meta.xml
    let objects_dir = grandparent.parent()?;
    if objects_dir.file_name()?.to_str()? != OBJECTS_DIR {
        return None;
    }
    let (_, _, type_name) = CHILD_TYPES
        .iter()
        .find(|(dir, s, _)| *dir == parent_name && *s == suffix)?;
    Some(Component {
        full_name: stem.to_string(),
        type_name: type_name.to_string(),
        content: None,
        xml: Some(parent_dir.join(format!("{stem}.{suffix}{META_SUFFIX}"))),
        parent: Some(ComponentKey::new("CustomObject", grandparent_name)),
    })
}

/// Nearest ancestor that is a bundle directory (directly under `aura/` or
/// `lwc/`), together with its bundle type.
fn find_bundle_root(path: &Path) -> Option<(PathBuf, &'static str)> {
    let mut current = path;
    while let Some(parent) = current.parent() {
        if let Some(name) = parent.file_name().and_then(|n| n.to_str()) {
            match name {
                AURA_DIR => return Some((current.to_path_buf(), "AuraDefinitionBundle")),
                LWC_DIR => return Some((current.to_path_buf(), "LightningComponentBundle")),
                _ => {}
            }
        }
        current = parent;
    }
    None
}

fn resolve_bundle(bundle_dir: &Path, type_name: &'static str) -> Option<Component> {
    if !bundle_dir.is_dir() {
        return None;
    }
    let name = bundle_dir.file_name()?.to_str()?;
    let xml = ["cmp", "app", "evt", "js"]
        .iter()
        .map(|ext| bundle_dir.join(format!("{name}.{ext}{META_SUFFIX}")))
        .find(|p| p.exists());
    Some(Component {
        full_name: name.to_string(),
        type_name: type_name.to_string(),
        content: Some(bundle_dir.to_path_buf()),
        xml,
        parent: None,
    })
}
