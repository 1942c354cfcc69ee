//! Retrieve client backed by the `sf` command-line tool.
//!
//! The CLI is spawned with `--json`, its stdout parsed into the retrieve
//! outcome, and the output directory resolved into components afterwards.
//! The child is started with `kill_on_drop` so cancellation or timeout
//! cannot leak a process.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cache::props::FileProperties;
use crate::component::resolver::ComponentResolver;
use crate::error::OrgError;

use super::{RetrieveClient, RetrieveOperation, RetrieveOutcome, RetrieveRequest};

pub const DEFAULT_RETRIEVE_TIMEOUT: Duration = Duration::from_secs(300);

/// The descriptor row the server emits for the package manifest itself; it
/// never corresponds to a retrievable component.
const PACKAGE_TYPE: &str = "Package";

#[derive(Debug, Clone)]
pub struct CliRetrieveClient {
    binary: String,
    timeout: Duration,
}

impl CliRetrieveClient {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    async fn run_retrieve(
        &self,
        request: RetrieveRequest,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<RetrieveOutcome> {
        let mut command = Command::new(&self.binary);
        command
            .arg("project")
            .arg("retrieve")
            .arg("start")
            .arg("--json")
            .arg("-o")
            .arg(&request.username)
            .arg("-r")
            .arg(&request.output_dir)
            .arg("--api-version")
            .arg(&request.api_version);
        for member in &request.members {
            command.arg("-m").arg(member);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            binary = %self.binary,
            members = request.members.len(),
            output_dir = %request.output_dir.display(),
            "starting metadata retrieve"
        );
        let child = command
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.binary))?;

        let output = tokio::select! {
            result = tokio::time::timeout(self.timeout, child.wait_with_output()) => {
                match result {
                    Ok(output) => output.context("retrieve process failed")?,
                    Err(_) => {
                        return Err(OrgError::Timeout {
                            what: "metadata retrieve".to_string(),
                        }
                        .into())
                    }
                }
            }
            // A dropped handle counts as cancellation too; the child dies
            // with the dropped future.
            _ = cancel.wait_for(|c| *c) => {
                return Err(OrgError::Cancelled.into());
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let (success, file_properties) = parse_retrieve_output(stdout.trim())?;
        if !success {
            warn!(username = %request.username, "retrieve reported failure");
            return Ok(RetrieveOutcome::default());
        }

        let output_dir = request.output_dir.clone();
        let components = tokio::task::spawn_blocking(move || {
            ComponentResolver::for_directory(&output_dir).resolve_path(&output_dir)
        })
        .await
        .context("cache resolution task panicked")??;

        Ok(RetrieveOutcome {
            success,
            file_properties,
            components: components.into_components(),
        })
    }
}

#[async_trait]
impl RetrieveClient for CliRetrieveClient {
    async fn retrieve(&self, request: &RetrieveRequest) -> Result<RetrieveOperation> {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel_tx = Arc::new(cancel_tx);
        let client = self.clone();
        let request = request.clone();
        let task = tokio::spawn(async move { client.run_retrieve(request, cancel_rx).await });
        Ok(RetrieveOperation::new(task, cancel_tx))
    }
}

// ─── CLI output parsing ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CliEnvelope {
    status: i64,
    #[serde(default)]
    result: Option<CliRetrieveResult>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliRetrieveResult {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    file_properties: Option<OneOrMany<FileProperties>>,
}

/// Legacy metadata responses collapse single-element arrays to a bare
/// object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> From<OneOrMany<T>> for Vec<T> {
    fn from(value: OneOrMany<T>) -> Self {
        match value {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

fn parse_retrieve_output(raw: &str) -> Result<(bool, Vec<FileProperties>)> {
    if raw.is_empty() {
        bail!("retrieve produced no output");
    }
    let envelope: CliEnvelope =
        serde_json::from_str(raw).context("failed to parse retrieve output")?;
    if envelope.status != 0 {
        return Err(OrgError::Cli {
            message: envelope
                .message
                .unwrap_or_else(|| format!("retrieve exited with status {}", envelope.status)),
        }
        .into());
    }
    let Some(result) = envelope.result else {
        return Ok((false, Vec::new()));
    };
    let mut properties: Vec<FileProperties> =
        result.file_properties.map(Vec::from).unwrap_or_default();
    properties.retain(|p| p.type_name != PACKAGE_TYPE);
    Ok((result.success, properties))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_property_array() {
        let raw = r#"{
            "status": 0,
            "result": {
                "success": true,
                "fileProperties": [
                    {"fullName": "Foo", "type": "ApexClass", "lastModifiedDate": "2024-01-01T00:00:00.000Z"},
                    {"fullName": "package.xml", "type": "Package", "lastModifiedDate": "2024-01-01T00:00:00.000Z"}
                ]
            }
        }"#;
        let (success, props) = parse_retrieve_output(raw).unwrap();
        assert!(success);
        // the manifest descriptor row is dropped
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].full_name, "Foo");
    }

    #[test]
    fn parses_a_collapsed_single_property() {
        let raw = r#"{
            "status": 0,
            "result": {
                "success": true,
                "fileProperties": {"fullName": "Foo", "type": "ApexClass", "lastModifiedDate": "2024-01-01T00:00:00.000Z"}
            }
        }"#;
        let (_, props) = parse_retrieve_output(raw).unwrap();
        assert_eq!(props.len(), 1);
    }

    #[test]
    fn nonzero_status_surfaces_the_cli_message() {
        let raw = r#"{"status": 1, "message": "No org configured"}"#;
        let err = parse_retrieve_output(raw).unwrap_err();
        match err.downcast_ref::<OrgError>() {
            Some(OrgError::Cli { message }) => assert_eq!(message, "No org configured"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_output_is_an_error() {
        assert!(parse_retrieve_output("").is_err());
    }

    #[test]
    fn missing_result_payload_is_a_failed_outcome() {
        let (success, props) = parse_retrieve_output(r#"{"status": 0}"#).unwrap();
        assert!(!success);
        assert!(props.is_empty());
    }
}
