//! Retrieve property persistence — the `prop/file-props.json` side-file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::component::ComponentKey;

const PROP_DIR: &str = "prop";
const PROP_FILE: &str = "file-props.json";

/// Server-reported metadata for one retrieved component. Audit fields are
/// carried for the side-file but unused by the diff core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileProperties {
    pub full_name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub last_modified_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_by_name: Option<String>,
}

impl FileProperties {
    pub fn key(&self) -> ComponentKey {
        ComponentKey::new(self.type_name.clone(), self.full_name.clone())
    }
}

/// On-disk shape of the side-file: the selected path plus the most recent
/// retrieve's properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyFile {
    pub component_path: PathBuf,
    pub file_properties: Vec<FileProperties>,
}

impl PropertyFile {
    /// Write under `{cache_path}/prop/file-props.json`, creating the
    /// directory. Write failures propagate.
    pub fn save(&self, cache_path: &Path) -> Result<PathBuf> {
        let prop_dir = cache_path.join(PROP_DIR);
        std::fs::create_dir_all(&prop_dir)
            .with_context(|| format!("failed to create {}", prop_dir.display()))?;
        let path = prop_dir.join(PROP_FILE);
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn load(cache_path: &Path) -> Result<Self> {
        let path = cache_path.join(PROP_DIR).join(PROP_FILE);
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))
    }
}
