//! Org credentials.
//!
//! Explicitly configured credentials win; otherwise the `sf` CLI's stored
//! auth is read through `sf org display --json`.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::config::OrgdConfig;
use crate::error::OrgError;

const ORG_DISPLAY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct OrgAuth {
    pub username: String,
    pub instance_url: String,
    pub access_token: String,
    pub api_version: String,
}

impl OrgAuth {
    /// Resolve credentials for `username`.
    pub async fn resolve(config: &OrgdConfig, username: &str) -> Result<Self> {
        if let (Some(instance_url), Some(access_token)) =
            (config.instance_url.clone(), config.access_token.clone())
        {
            debug!(username, "using configured credentials");
            return Ok(Self {
                username: username.to_string(),
                instance_url,
                access_token,
                api_version: config.api_version.clone(),
            });
        }
        Self::from_cli(&config.sf_binary, username, &config.api_version).await
    }

    async fn from_cli(binary: &str, username: &str, fallback_api_version: &str) -> Result<Self> {
        let output = tokio::time::timeout(
            ORG_DISPLAY_TIMEOUT,
            Command::new(binary)
                .arg("org")
                .arg("display")
                .arg("-o")
                .arg(username)
                .arg("--json")
                .output(),
        )
        .await
        .map_err(|_| OrgError::Timeout {
            what: "org display".to_string(),
        })?
        .with_context(|| format!("failed to run {binary} org display"))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_display_output(stdout.trim(), username, fallback_api_version)
    }
}

#[derive(Debug, Deserialize)]
struct DisplayEnvelope {
    status: i64,
    #[serde(default)]
    result: Option<DisplayResult>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisplayResult {
    #[serde(default)]
    instance_url: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    api_version: Option<String>,
}

fn parse_display_output(raw: &str, username: &str, fallback_api_version: &str) -> Result<OrgAuth> {
    let envelope: DisplayEnvelope =
        serde_json::from_str(raw).context("failed to parse org display output")?;
    if envelope.status != 0 {
        return Err(OrgError::Auth {
            message: envelope
                .message
                .unwrap_or_else(|| "org display failed".to_string()),
        }
        .into());
    }
    let result = envelope.result.ok_or_else(|| OrgError::Auth {
        message: "org display returned no result".to_string(),
    })?;
    match (result.instance_url, result.access_token) {
        (Some(instance_url), Some(access_token)) => Ok(OrgAuth {
            username: username.to_string(),
            instance_url,
            access_token,
            api_version: result
                .api_version
                .unwrap_or_else(|| fallback_api_version.to_string()),
        }),
        _ => Err(OrgError::Auth {
            message: format!("no credentials available for {username}"),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cli_credentials() {
        let raw = r#"{
            "status": 0,
            "result": {
                "instanceUrl": "https://example.my.salesforce.com",
                "accessToken": "00D_token",
                "apiVersion": "61.0"
            }
        }"#;
        let auth = parse_display_output(raw, "user@example.com", "60.0").unwrap();
        assert_eq!(auth.instance_url, "https://example.my.salesforce.com");
        assert_eq!(auth.api_version, "61.0");
    }

    #[test]
    fn missing_api_version_falls_back() {
        let raw = r#"{
            "status": 0,
            "result": {
                "instanceUrl": "https://example.my.salesforce.com",
                "accessToken": "00D_token"
            }
        }"#;
        let auth = parse_display_output(raw, "user@example.com", "60.0").unwrap();
        assert_eq!(auth.api_version, "60.0");
    }

    #[test]
    fn failed_status_is_an_auth_error() {
        let raw = r#"{"status": 1, "message": "No authorization found"}"#;
        let err = parse_display_output(raw, "user@example.com", "60.0").unwrap_err();
        match err.downcast_ref::<OrgError>() {
            Some(OrgError::Auth { message }) => assert_eq!(message, "No authorization found"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_token_is_an_auth_error() {
        let raw = r#"{
            "status": 0,
            "result": {"instanceUrl": "https://example.my.salesforce.com"}
        }"#;
        let err = parse_display_output(raw, "user@example.com", "60.0").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OrgError>(),
            Some(OrgError::Auth { .. })
        ));
    }
}
