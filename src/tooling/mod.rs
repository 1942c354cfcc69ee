// SPDX-License-Identifier: MIT

//! Minimal Tooling API client: query, create, batched delete.
//!
//! Every non-2xx response is decoded into the API's error-array shape and
//! surfaced as [`OrgError::Tooling`] so callers can inspect error codes.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::auth::OrgAuth;
use crate::error::{ApiError, OrgError};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Subrequest ceiling for one composite batch call.
pub const BATCH_LIMIT: usize = 25;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    #[serde(default)]
    pub records: Vec<Value>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub total_size: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateResult {
    pub id: String,
    pub success: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResultItem {
    pub status_code: u16,
    #[serde(default)]
    pub result: Value,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResults {
    pub has_errors: bool,
    #[serde(default)]
    pub results: Vec<BatchResultItem>,
}

/// The API surface the checkpoint machinery needs; mocked in tests.
#[async_trait]
pub trait ToolingApi: Send + Sync {
    async fn query(&self, soql: &str) -> Result<QueryResult>;
    async fn create(&self, sobject: &str, body: Value) -> Result<CreateResult>;
    async fn batch_delete(&self, sobject: &str, ids: &[String]) -> Result<BatchResults>;
    async fn current_user_id(&self) -> Result<String>;
}

pub struct ToolingClient {
    http: Client,
    auth: OrgAuth,
}

impl ToolingClient {
    pub fn new(auth: OrgAuth) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build http client")?;
        Ok(Self { http, auth })
    }

    fn base_url(&self) -> String {
        format!(
            "{}/services/data/v{}/tooling",
            self.auth.instance_url.trim_end_matches('/'),
            self.auth.api_version
        )
    }

    async fn read_json<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .context("failed to decode response body");
        }
        let body = response.text().await.unwrap_or_default();
        Err(OrgError::Tooling {
            status: status.as_u16(),
            errors: parse_api_errors(status, &body),
        }
        .into())
    }
}

#[async_trait]
impl ToolingApi for ToolingClient {
    async fn query(&self, soql: &str) -> Result<QueryResult> {
        debug!(soql, "tooling query");
        let response = self
            .http
            .get(format!("{}/query", self.base_url()))
            .bearer_auth(&self.auth.access_token)
            .query(&[("q", soql)])
            .send()
            .await
            .context("tooling query request failed")?;
        self.read_json(response).await
    }

    async fn create(&self, sobject: &str, body: Value) -> Result<CreateResult> {
        let response = self
            .http
            .post(format!("{}/sobjects/{}", self.base_url(), sobject))
            .bearer_auth(&self.auth.access_token)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("create {sobject} request failed"))?;
        self.read_json(response).await
    }

    async fn batch_delete(&self, sobject: &str, ids: &[String]) -> Result<BatchResults> {
        let mut combined = BatchResults::default();
        for chunk in ids.chunks(BATCH_LIMIT) {
            let requests: Vec<Value> = chunk
                .iter()
                .map(|id| {
                    serde_json::json!({
                        "method": "DELETE",
                        "url": format!(
                            "v{}/tooling/sobjects/{}/{}",
                            self.auth.api_version, sobject, id
                        ),
                    })
                })
                .collect();
            let response = self
                .http
                .post(format!("{}/composite/batch", self.base_url()))
                .bearer_auth(&self.auth.access_token)
                .json(&serde_json::json!({ "batchRequests": requests }))
                .send()
                .await
                .context("batch delete request failed")?;
            let mut results: BatchResults = self.read_json(response).await?;
            combined.has_errors |= results.has_errors;
            combined.results.append(&mut results.results);
        }
        Ok(combined)
    }

    async fn current_user_id(&self) -> Result<String> {
        let soql = format!(
            "SELECT Id FROM User WHERE Username = '{}'",
            self.auth.username.replace('\'', "\\'")
        );
        let result = self.query(&soql).await?;
        result
            .records
            .first()
            .and_then(|record| record.get("Id"))
            .and_then(|id| id.as_str())
            .map(|id| id.to_string())
            .ok_or_else(|| {
                OrgError::Auth {
                    message: format!("no user record for {}", self.auth.username),
                }
                .into()
            })
    }
}

fn parse_api_errors(status: StatusCode, body: &str) -> Vec<ApiError> {
    serde_json::from_str::<Vec<ApiError>>(body).unwrap_or_else(|_| {
        vec![ApiError {
            message: if body.is_empty() {
                format!("HTTP {status}")
            } else {
                body.to_string()
            },
            error_code: "UNKNOWN".to_string(),
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_arrays_decode() {
        let body = r#"[{"message": "bad line", "errorCode": "FIELD_INTEGRITY_EXCEPTION"}]"#;
        let errors = parse_api_errors(StatusCode::BAD_REQUEST, body);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_code, "FIELD_INTEGRITY_EXCEPTION");
    }

    #[test]
    fn unparseable_bodies_become_a_single_unknown_error() {
        let errors = parse_api_errors(StatusCode::BAD_GATEWAY, "<html>oops</html>");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_code, "UNKNOWN");
        assert_eq!(errors[0].message, "<html>oops</html>");
    }

    #[test]
    fn empty_bodies_report_the_status() {
        let errors = parse_api_errors(StatusCode::INTERNAL_SERVER_ERROR, "");
        assert_eq!(errors[0].message, "HTTP 500 Internal Server Error");
    }

    #[test]
    fn batch_results_use_wire_names() {
        let raw = r#"{
            "hasErrors": true,
            "results": [
                {"statusCode": 204, "result": null},
                {"statusCode": 400, "result": [{"message": "gone", "errorCode": "ENTITY_IS_DELETED"}]}
            ]
        }"#;
        let parsed: BatchResults = serde_json::from_str(raw).unwrap();
        assert!(parsed.has_errors);
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[1].status_code, 400);
    }

    #[test]
    fn query_result_defaults_are_tolerant() {
        let parsed: QueryResult = serde_json::from_str(r#"{"records": []}"#).unwrap();
        assert!(!parsed.done);
        assert_eq!(parsed.total_size, 0);
    }
}
