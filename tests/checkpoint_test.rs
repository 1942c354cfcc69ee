//! Checkpoint upload sequence against mocked org collaborators.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use orgd::checkpoint::line_info::{LineBreakpointInfo, LineInfoProvider};
use orgd::checkpoint::service::{CheckpointService, UploadContext};
use orgd::checkpoint::{CheckpointEntry, SOURCE_OUT_OF_SYNC};
use orgd::error::{ApiError, OrgError};
use orgd::notify::NotificationSink;
use orgd::tooling::{BatchResults, CreateResult, QueryResult, ToolingApi};
use serde_json::{json, Value};
use tempfile::TempDir;

const USER_ID: &str = "005xx000001X8UzAAK";

// ── Mock collaborators ───────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingTooling {
    calls: Mutex<Vec<String>>,
    existing_ids: Vec<String>,
    create_failure: Option<ApiError>,
    identity_delay: Option<Duration>,
}

impl RecordingTooling {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_existing(ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            existing_ids: ids.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        })
    }

    fn failing_create(code: &str, message: &str) -> Arc<Self> {
        Arc::new(Self {
            create_failure: Some(ApiError {
                message: message.to_string(),
                error_code: code.to_string(),
            }),
            ..Self::default()
        })
    }

    fn slow_identity(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            identity_delay: Some(delay),
            ..Self::default()
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolingApi for RecordingTooling {
    async fn query(&self, soql: &str) -> Result<QueryResult> {
        self.calls.lock().unwrap().push(format!("query {soql}"));
        let records: Vec<Value> = self
            .existing_ids
            .iter()
            .map(|id| json!({ "Id": id }))
            .collect();
        Ok(QueryResult {
            total_size: records.len() as i64,
            done: true,
            records,
        })
    }

    async fn create(&self, sobject: &str, body: Value) -> Result<CreateResult> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("create {sobject} line {}", body["Line"]));
        if let Some(failure) = &self.create_failure {
            return Err(OrgError::Tooling {
                status: 400,
                errors: vec![failure.clone()],
            }
            .into());
        }
        let n = self.calls.lock().unwrap().len();
        Ok(CreateResult {
            id: format!("1doxx{n:010}"),
            success: true,
        })
    }

    async fn batch_delete(&self, sobject: &str, ids: &[String]) -> Result<BatchResults> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("delete {sobject} x{}", ids.len()));
        Ok(BatchResults {
            has_errors: false,
            results: Vec::new(),
        })
    }

    async fn current_user_id(&self) -> Result<String> {
        if let Some(delay) = self.identity_delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().unwrap().push("user".to_string());
        Ok(USER_ID.to_string())
    }
}

struct StaticLineInfo {
    infos: Vec<LineBreakpointInfo>,
}

impl StaticLineInfo {
    /// `classes/Foo.cls` with valid lines 5, 9, and 12.
    fn foo() -> Arc<Self> {
        Arc::new(Self {
            infos: vec![LineBreakpointInfo {
                uri: "classes/Foo.cls".to_string(),
                type_ref: "Foo".to_string(),
                lines: vec![1, 2, 3, 4, 5, 6, 9, 12],
            }],
        })
    }
}

#[async_trait]
impl LineInfoProvider for StaticLineInfo {
    async fn line_breakpoint_info(&self) -> Result<Vec<LineBreakpointInfo>> {
        Ok(self.infos.clone())
    }
}

/// A language server that never finishes indexing.
struct SilentLineInfo;

#[async_trait]
impl LineInfoProvider for SilentLineInfo {
    async fn line_breakpoint_info(&self) -> Result<Vec<LineBreakpointInfo>> {
        std::future::pending().await
    }
}

#[derive(Default)]
struct RecordingSink {
    lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingSink {
    fn info(&self, message: &str) {
        self.lines.lock().unwrap().push(format!("info: {message}"));
    }
    fn warn(&self, message: &str) {
        self.lines.lock().unwrap().push(format!("warn: {message}"));
    }
    fn error(&self, message: &str) {
        self.lines.lock().unwrap().push(format!("error: {message}"));
    }
    fn append_line(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn upload_ctx(
    tooling: Arc<RecordingTooling>,
    line_info: Arc<dyn LineInfoProvider>,
    deadline: Duration,
    sink: Arc<RecordingSink>,
) -> UploadContext {
    UploadContext {
        tooling,
        line_info,
        line_info_deadline: deadline,
        username: "user@example.com".to_string(),
        notifier: sink,
    }
}

async fn seed(service: &CheckpointService, lines: &[u32]) {
    for &line in lines {
        let entry = CheckpointEntry::from_breakpoint("classes/Foo.cls", line, None, None).unwrap();
        service.upsert(entry).await.unwrap();
    }
}

fn spawn_service(tmp: &TempDir) -> CheckpointService {
    CheckpointService::spawn(tmp.path().join("checkpoints.json")).unwrap()
}

// ── Upload sequence ──────────────────────────────────────────────────────────

#[tokio::test]
async fn upload_runs_the_steps_in_order_and_stores_remote_ids() {
    let tmp = TempDir::new().unwrap();
    let service = spawn_service(&tmp);
    seed(&service, &[5, 9]).await;

    let tooling = RecordingTooling::with_existing(&["1doOLD0000000001", "1doOLD0000000002"]);
    let sink = Arc::new(RecordingSink::default());
    let report = service
        .upload(upload_ctx(
            tooling.clone(),
            StaticLineInfo::foo(),
            Duration::from_secs(1),
            sink.clone(),
        ))
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.created, 2);
    assert_eq!(report.deleted, 2);

    let calls = tooling.calls();
    assert_eq!(calls[0], "user");
    assert!(calls[1].starts_with("query SELECT Id FROM ApexExecutionOverlayAction"));
    assert!(calls[1].contains(USER_ID));
    assert_eq!(calls[2], "delete ApexExecutionOverlayAction x2");
    assert_eq!(calls[3], "create ApexExecutionOverlayAction line 5");
    assert_eq!(calls[4], "create ApexExecutionOverlayAction line 9");
    assert_eq!(calls.len(), 5);

    // Remote identifiers are written back to the stored entries.
    let entries = service.list().await.unwrap();
    assert!(entries.iter().all(|e| e.action_object_id.is_some()));
    assert!(entries.iter().all(|e| e.type_ref.as_deref() == Some("Foo")));

    let lines = sink.lines();
    let steps: Vec<&String> = lines.iter().filter(|l| l.starts_with("step")).collect();
    assert_eq!(steps.len(), 6);
    assert!(steps[0].starts_with("step 1 of 6"));
    assert!(steps[5].starts_with("step 6 of 6"));
}

#[tokio::test]
async fn more_than_five_enabled_checkpoints_abort_before_any_deletion() {
    let tmp = TempDir::new().unwrap();
    let service = spawn_service(&tmp);
    seed(&service, &[1, 2, 3, 4, 5, 6]).await;

    let tooling = RecordingTooling::with_existing(&["1doOLD0000000001"]);
    let sink = Arc::new(RecordingSink::default());
    let report = service
        .upload(upload_ctx(
            tooling.clone(),
            StaticLineInfo::foo(),
            Duration::from_secs(1),
            sink,
        ))
        .await
        .unwrap();

    assert!(!report.success);
    assert!(report.error.unwrap().contains("6 checkpoints enabled; the limit is 5"));

    // The existing overlay actions were left untouched.
    let calls = tooling.calls();
    assert_eq!(calls, vec!["user".to_string()]);
}

#[tokio::test]
async fn nothing_enabled_is_informational_and_touches_nothing_remote() {
    let tmp = TempDir::new().unwrap();
    let service = spawn_service(&tmp);
    seed(&service, &[5]).await;
    assert_eq!(service.toggle("classes/Foo.cls", 5).await.unwrap(), Some(false));

    let tooling = RecordingTooling::with_existing(&["1doOLD0000000001"]);
    let sink = Arc::new(RecordingSink::default());
    let report = service
        .upload(upload_ctx(
            tooling.clone(),
            StaticLineInfo::foo(),
            Duration::from_secs(1),
            sink.clone(),
        ))
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.created, 0);
    assert_eq!(report.deleted, 0);
    assert!(sink
        .lines()
        .iter()
        .any(|l| l.contains("no enabled checkpoints to upload")));
    assert_eq!(tooling.calls(), vec!["user".to_string()]);
}

#[tokio::test]
async fn an_invalid_line_aborts_before_any_deletion() {
    let tmp = TempDir::new().unwrap();
    let service = spawn_service(&tmp);
    seed(&service, &[7]).await; // 7 is not breakpoint-valid in the fixture

    let tooling = RecordingTooling::new();
    let sink = Arc::new(RecordingSink::default());
    let report = service
        .upload(upload_ctx(
            tooling.clone(),
            StaticLineInfo::foo(),
            Duration::from_secs(1),
            sink,
        ))
        .await
        .unwrap();

    assert!(!report.success);
    assert!(report
        .error
        .unwrap()
        .contains("line 7 in classes/Foo.cls is not a valid checkpoint location"));
    assert_eq!(tooling.calls(), vec!["user".to_string()]);
}

#[tokio::test]
async fn field_integrity_failures_map_to_the_out_of_sync_message() {
    let tmp = TempDir::new().unwrap();
    let service = spawn_service(&tmp);
    seed(&service, &[5]).await;

    let tooling =
        RecordingTooling::failing_create("FIELD_INTEGRITY_EXCEPTION", "Line number invalid");
    let sink = Arc::new(RecordingSink::default());
    let report = service
        .upload(upload_ctx(
            tooling,
            StaticLineInfo::foo(),
            Duration::from_secs(1),
            sink,
        ))
        .await
        .unwrap();

    assert!(!report.success);
    let error = report.error.unwrap();
    assert!(error.contains("classes/Foo.cls:5"));
    assert!(error.contains(SOURCE_OUT_OF_SYNC));
}

#[tokio::test]
async fn line_info_past_the_deadline_reports_a_timeout() {
    let tmp = TempDir::new().unwrap();
    let service = spawn_service(&tmp);
    seed(&service, &[5]).await;

    let tooling = RecordingTooling::new();
    let sink = Arc::new(RecordingSink::default());
    let report = service
        .upload(upload_ctx(
            tooling.clone(),
            Arc::new(SilentLineInfo),
            Duration::from_millis(50),
            sink,
        ))
        .await
        .unwrap();

    assert!(!report.success);
    assert!(report
        .error
        .unwrap()
        .contains("timed out waiting for source line information"));
    assert_eq!(tooling.calls(), vec!["user".to_string()]);
}

// ── Concurrency guard ────────────────────────────────────────────────────────

#[tokio::test]
async fn a_second_upload_is_rejected_while_one_is_in_flight() {
    let tmp = TempDir::new().unwrap();
    let service = spawn_service(&tmp);
    seed(&service, &[5]).await;

    let slow = RecordingTooling::slow_identity(Duration::from_millis(300));
    let sink = Arc::new(RecordingSink::default());
    let first = {
        let service = service.clone();
        let ctx = upload_ctx(
            slow,
            StaticLineInfo::foo(),
            Duration::from_secs(1),
            sink.clone(),
        );
        tokio::spawn(async move { service.upload(ctx).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = service
        .upload(upload_ctx(
            RecordingTooling::new(),
            StaticLineInfo::foo(),
            Duration::from_secs(1),
            sink.clone(),
        ))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already in progress"));
    assert!(sink
        .lines()
        .iter()
        .any(|l| l.contains("a checkpoint upload is already in progress")));

    let report = first.await.unwrap().unwrap();
    assert!(report.success);

    // The guard resets once the first upload finishes.
    let again = service
        .upload(upload_ctx(
            RecordingTooling::new(),
            StaticLineInfo::foo(),
            Duration::from_secs(1),
            sink,
        ))
        .await
        .unwrap();
    assert!(again.success);
}

// ── Worker ordering ──────────────────────────────────────────────────────────

#[tokio::test]
async fn mutations_queued_behind_an_upload_apply_after_it() {
    let tmp = TempDir::new().unwrap();
    let service = spawn_service(&tmp);
    seed(&service, &[5]).await;

    let tooling = RecordingTooling::slow_identity(Duration::from_millis(200));
    let sink = Arc::new(RecordingSink::default());
    let ctx = upload_ctx(
        tooling.clone(),
        StaticLineInfo::foo(),
        Duration::from_secs(1),
        sink,
    );

    // The upload command is queued on the join's first poll; the upsert lands
    // behind it and cannot apply until the worker finishes the upload.
    let queued = CheckpointEntry::from_breakpoint("classes/Foo.cls", 9, None, None).unwrap();
    let (report, _) = tokio::join!(service.upload(ctx), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        service.upsert(queued).await.unwrap();
    });

    let report = report.unwrap();
    assert!(report.success);
    assert_eq!(report.created, 1);

    let creates = tooling
        .calls()
        .iter()
        .filter(|c| c.starts_with("create"))
        .count();
    assert_eq!(creates, 1, "the upload saw only the pre-upload arena");
    assert_eq!(service.list().await.unwrap().len(), 2);
}
