//! Metadata component model.
//!
//! A component is one deployable metadata unit — a named, typed bundle of a
//! content file (or bundle directory) and an optional sidecar descriptor.
//! Child types such as custom fields carry a key reference to their owning
//! component instead of a back-pointer; all relationships are resolved
//! through [`ComponentKey`] lookups.

pub mod manifest;
pub mod resolver;

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

/// `type#fullName` — the join key used everywhere local and remote
/// components are paired.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentKey {
    pub type_name: String,
    pub full_name: String,
}

impl ComponentKey {
    pub fn new(type_name: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            full_name: full_name.into(),
        }
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_name, self.full_name)
    }
}

/// One deployable metadata unit.
///
/// Value-like: constructed fresh per scan or retrieve, never shared mutably.
/// `(type_name, full_name)` is unique within a [`ComponentSet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub full_name: String,
    pub type_name: String,
    /// Primary content path — a file, or the bundle directory for bundle
    /// types. Metadata-only types have no content.
    pub content: Option<PathBuf>,
    /// Sidecar descriptor path (`*-meta.xml`).
    pub xml: Option<PathBuf>,
    /// Owning component key for child types (e.g. a field's custom object).
    pub parent: Option<ComponentKey>,
}

impl Component {
    pub fn key(&self) -> ComponentKey {
        ComponentKey::new(self.type_name.clone(), self.full_name.clone())
    }

    /// Directory the component lives in — parent of the content path,
    /// falling back to the descriptor. Used for common-root inference.
    pub fn directory(&self) -> Option<&Path> {
        self.content
            .as_deref()
            .or(self.xml.as_deref())
            .and_then(Path::parent)
    }

    /// Every file belonging to the component: content files first (bundle
    /// directories expanded recursively), descriptor last. Unreadable
    /// bundle directories are hard errors.
    pub fn file_paths(&self) -> io::Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        if let Some(content) = &self.content {
            if content.is_dir() {
                for entry in WalkDir::new(content) {
                    let entry = entry.map_err(io::Error::other)?;
                    if entry.file_type().is_file() {
                        paths.push(entry.into_path());
                    }
                }
            } else {
                paths.push(content.clone());
            }
        }
        if let Some(xml) = &self.xml {
            if !paths.contains(xml) {
                paths.push(xml.clone());
            }
        }
        Ok(paths)
    }
}

/// An ordered, key-deduplicated collection of components.
#[derive(Debug, Clone, Default)]
pub struct ComponentSet {
    components: Vec<Component>,
    seen: HashSet<ComponentKey>,
}

impl ComponentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, ignoring a component whose key is already present.
    pub fn add(&mut self, component: Component) {
        if self.seen.insert(component.key()) {
            self.components.push(component);
        }
    }

    pub fn contains_key(&self, key: &ComponentKey) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.components.iter()
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn into_components(self) -> Vec<Component> {
        self.components
    }

    /// `Type:FullName` member selectors for the retrieve request. Children
    /// are represented by their parent (retrieving the parent brings its
    /// children), deduplicated and sorted for a stable command line.
    pub fn member_strings(&self) -> Vec<String> {
        let mut members: Vec<String> = self
            .components
            .iter()
            .map(|c| match &c.parent {
                Some(parent) => format!("{}:{}", parent.type_name, parent.full_name),
                None => format!("{}:{}", c.type_name, c.full_name),
            })
            .collect();
        members.sort();
        members.dedup();
        members
    }
}

impl FromIterator<Component> for ComponentSet {
    fn from_iter<I: IntoIterator<Item = Component>>(iter: I) -> Self {
        let mut set = Self::new();
        for component in iter {
            set.add(component);
        }
        set
    }
}
