//! Source line information from the Apex language-server collaborator.
//!
//! Checkpoints can only be created on lines the compiler considers
//! breakpoint-valid, and the remote overlay record wants the top-level type
//! name rather than a file path; both come from here.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Valid checkpoint lines plus the top-level type for one source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineBreakpointInfo {
    pub uri: String,
    #[serde(rename = "typeref")]
    pub type_ref: String,
    pub lines: Vec<u32>,
}

/// Find the info record for a source path.
pub fn info_for<'a>(
    infos: &'a [LineBreakpointInfo],
    source_path: &str,
) -> Option<&'a LineBreakpointInfo> {
    infos.iter().find(|info| info.uri == source_path)
}

#[async_trait]
pub trait LineInfoProvider: Send + Sync {
    /// Resolves once the collaborator has published line info. May pend
    /// forever; callers compose their own deadline around it.
    async fn line_breakpoint_info(&self) -> Result<Vec<LineBreakpointInfo>>;
}

/// Provider backed by a JSON file the language server writes as it finishes
/// indexing. Polls until the file appears.
pub struct FileLineInfoProvider {
    path: PathBuf,
    poll_interval: Duration,
}

impl FileLineInfoProvider {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            poll_interval: Duration::from_millis(100),
        }
    }
}

#[async_trait]
impl LineInfoProvider for FileLineInfoProvider {
    async fn line_breakpoint_info(&self) -> Result<Vec<LineBreakpointInfo>> {
        loop {
            match tokio::fs::read_to_string(&self.path).await {
                Ok(raw) => {
                    return serde_json::from_str(&raw)
                        .with_context(|| format!("failed to parse {}", self.path.display()));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("failed to read {}", self.path.display()));
                }
            }
        }
    }
}
