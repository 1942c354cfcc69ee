//! Package manifest — the JSON selector listing metadata types and members.
//!
//! Shape: `{ "version": "61.0", "types": [{ "name": "ApexClass",
//! "members": ["Foo", "Bar"] }] }`. A member of `*` selects every component
//! of the type.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageManifest {
    #[serde(default)]
    pub version: Option<String>,
    pub types: Vec<ManifestType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestType {
    pub name: String,
    pub members: Vec<String>,
}

impl PackageManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse manifest {}", path.display()))
    }

    /// True when the manifest names this component, exactly or via `*`.
    pub fn contains(&self, type_name: &str, full_name: &str) -> bool {
        self.types.iter().any(|t| {
            t.name == type_name
                && t.members
                    .iter()
                    .any(|m| m == WILDCARD || m == full_name)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_matches_members() {
        let manifest: PackageManifest = serde_json::from_str(
            r#"{
                "version": "61.0",
                "types": [
                    { "name": "ApexClass", "members": ["Foo", "Bar"] },
                    { "name": "CustomObject", "members": ["*"] }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(manifest.version.as_deref(), Some("61.0"));
        assert!(manifest.contains("ApexClass", "Foo"));
        assert!(!manifest.contains("ApexClass", "Baz"));
        assert!(manifest.contains("CustomObject", "Anything"));
        assert!(!manifest.contains("ApexTrigger", "Foo"));
    }
}
