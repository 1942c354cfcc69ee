//! Domain error taxonomy shared by the cache, retrieve, tooling, and
//! checkpoint paths.
//!
//! Resolution failures are not errors (callers get `Ok(None)` / an empty
//! set), and partial batch failures are structured results — only transport,
//! CLI, timeout, cancellation, and auth failures surface here. Application
//! code wraps these with `anyhow::Context` at call boundaries.

use serde::{Deserialize, Serialize};

/// One entry of an org API error payload (`[{ "message", "errorCode" }]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
    #[serde(rename = "errorCode")]
    pub error_code: String,
}

#[derive(Debug, thiserror::Error)]
pub enum OrgError {
    /// Tooling API request rejected with a non-2xx status.
    #[error("tooling request failed with status {status}: {}", join_messages(errors))]
    Tooling { status: u16, errors: Vec<ApiError> },

    /// The org CLI exited non-zero or produced an unreadable envelope.
    #[error("org CLI failed: {message}")]
    Cli { message: String },

    /// A bounded wait elapsed. Distinct from transport failure.
    #[error("timed out waiting for {what}")]
    Timeout { what: String },

    /// The operation was cancelled before completion; no partial result
    /// is salvaged.
    #[error("operation cancelled")]
    Cancelled,

    /// Org connection info could not be resolved.
    #[error("org auth resolution failed: {message}")]
    Auth { message: String },
}

impl OrgError {
    /// Error code of the first payload entry, for code-specific handling.
    pub fn first_error_code(&self) -> Option<&str> {
        match self {
            OrgError::Tooling { errors, .. } => errors.first().map(|e| e.error_code.as_str()),
            _ => None,
        }
    }
}

/// [`OrgError::first_error_code`] through however many context layers an
/// `anyhow::Error` has accumulated.
pub fn first_error_code(error: &anyhow::Error) -> Option<&str> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<OrgError>())
        .and_then(OrgError::first_error_code)
}

fn join_messages(errors: &[ApiError]) -> String {
    if errors.is_empty() {
        return "no error detail".to_string();
    }
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}
