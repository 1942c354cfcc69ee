// SPDX-License-Identifier: MIT

//! Checkpoint store worker and the ordered upload sequence.
//!
//! The arena has exactly one owner: the worker task spawned by
//! [`CheckpointService::spawn`]. Every mutation and read arrives as a
//! [`Command`] over a bounded channel and is applied strictly in arrival
//! order, so two callers can never interleave partial updates. Uploads run
//! inline on the worker, which also serializes them against store mutations.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{first_error_code, OrgError};
use crate::notify::NotificationSink;
use crate::tooling::ToolingApi;

use super::line_info::{info_for, LineInfoProvider};
use super::{
    CheckpointArena, CheckpointEntry, FIELD_INTEGRITY_EXCEPTION, MAX_CHECKPOINTS,
    OVERLAY_ACTION_SOBJECT, SOURCE_OUT_OF_SYNC,
};

/// How long the upload waits for the language server's line info.
pub const LINE_INFO_DEADLINE: Duration = Duration::from_secs(3);
const COMMAND_BUFFER: usize = 32;

/// External collaborators one upload needs.
pub struct UploadContext {
    pub tooling: Arc<dyn ToolingApi>,
    pub line_info: Arc<dyn LineInfoProvider>,
    pub line_info_deadline: Duration,
    pub username: String,
    pub notifier: Arc<dyn NotificationSink>,
}

#[derive(Debug, Clone)]
pub struct UploadReport {
    pub success: bool,
    pub created: usize,
    pub deleted: usize,
    pub error: Option<String>,
}

enum Command {
    Upsert {
        entry: CheckpointEntry,
        reply: oneshot::Sender<()>,
    },
    Remove {
        source_path: String,
        line: u32,
        reply: oneshot::Sender<bool>,
    },
    Toggle {
        source_path: String,
        line: u32,
        reply: oneshot::Sender<Option<bool>>,
    },
    Clear {
        reply: oneshot::Sender<usize>,
    },
    List {
        reply: oneshot::Sender<Vec<CheckpointEntry>>,
    },
    Upload {
        ctx: UploadContext,
        reply: oneshot::Sender<UploadReport>,
    },
}

#[derive(Clone)]
pub struct CheckpointService {
    tx: mpsc::Sender<Command>,
    uploading: Arc<AtomicBool>,
}

impl CheckpointService {
    /// Load the arena from `store_path` and spawn the worker that owns it.
    pub fn spawn(store_path: PathBuf) -> Result<Self> {
        let arena = CheckpointArena::load(&store_path)?;
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(store_worker(arena, store_path, rx));
        Ok(Self {
            tx,
            uploading: Arc::new(AtomicBool::new(false)),
        })
    }

    pub async fn upsert(&self, entry: CheckpointEntry) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Upsert { entry, reply })
            .await
            .map_err(|_| anyhow!("checkpoint store worker stopped"))?;
        rx.await.context("checkpoint store worker stopped")
    }

    pub async fn remove(&self, source_path: &str, line: u32) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Remove {
                source_path: source_path.to_string(),
                line,
                reply,
            })
            .await
            .map_err(|_| anyhow!("checkpoint store worker stopped"))?;
        rx.await.context("checkpoint store worker stopped")
    }

    pub async fn toggle(&self, source_path: &str, line: u32) -> Result<Option<bool>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Toggle {
                source_path: source_path.to_string(),
                line,
                reply,
            })
            .await
            .map_err(|_| anyhow!("checkpoint store worker stopped"))?;
        rx.await.context("checkpoint store worker stopped")
    }

    pub async fn clear(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Clear { reply })
            .await
            .map_err(|_| anyhow!("checkpoint store worker stopped"))?;
        rx.await.context("checkpoint store worker stopped")
    }

    pub async fn list(&self) -> Result<Vec<CheckpointEntry>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::List { reply })
            .await
            .map_err(|_| anyhow!("checkpoint store worker stopped"))?;
        rx.await.context("checkpoint store worker stopped")
    }

    /// Run the upload sequence. A second call while one is in flight is
    /// rejected immediately; it never queues behind or interrupts the
    /// running one.
    pub async fn upload(&self, ctx: UploadContext) -> Result<UploadReport> {
        if self.uploading.swap(true, Ordering::SeqCst) {
            ctx.notifier
                .warn("a checkpoint upload is already in progress");
            bail!("checkpoint upload already in progress");
        }
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Upload { ctx, reply }).await.is_err() {
            self.uploading.store(false, Ordering::SeqCst);
            bail!("checkpoint store worker stopped");
        }
        let report = rx.await;
        self.uploading.store(false, Ordering::SeqCst);
        report.context("checkpoint store worker stopped")
    }
}

async fn store_worker(
    mut arena: CheckpointArena,
    store_path: PathBuf,
    mut rx: mpsc::Receiver<Command>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Upsert { entry, reply } => {
                debug!(source = %entry.source_path, line = entry.line, "checkpoint upserted");
                arena.upsert(entry);
                persist(&arena, &store_path);
                let _ = reply.send(());
            }
            Command::Remove {
                source_path,
                line,
                reply,
            } => {
                let removed = arena.remove(&source_path, line);
                if removed {
                    persist(&arena, &store_path);
                }
                let _ = reply.send(removed);
            }
            Command::Toggle {
                source_path,
                line,
                reply,
            } => {
                let toggled = arena.toggle(&source_path, line);
                if toggled.is_some() {
                    persist(&arena, &store_path);
                }
                let _ = reply.send(toggled);
            }
            Command::Clear { reply } => {
                let count = arena.entries.len();
                arena.clear();
                persist(&arena, &store_path);
                let _ = reply.send(count);
            }
            Command::List { reply } => {
                let _ = reply.send(arena.entries.clone());
            }
            Command::Upload { ctx, reply } => {
                let report = run_upload(&mut arena, &ctx).await;
                // creates store remote ids on the entries
                persist(&arena, &store_path);
                let _ = reply.send(report);
            }
        }
    }
    debug!("checkpoint store worker stopped");
}

fn persist(arena: &CheckpointArena, path: &Path) {
    if let Err(e) = arena.save(path) {
        warn!(error = %e, path = %path.display(), "failed to persist checkpoints");
    }
}

enum StepOutcome {
    Uploaded { created: usize, deleted: usize },
    NothingEnabled,
}

async fn run_upload(arena: &mut CheckpointArena, ctx: &UploadContext) -> UploadReport {
    match upload_steps(arena, ctx).await {
        Ok(StepOutcome::Uploaded { created, deleted }) => {
            ctx.notifier.info(&format!(
                "uploaded {created} checkpoint(s), removed {deleted} stale overlay action(s)"
            ));
            UploadReport {
                success: true,
                created,
                deleted,
                error: None,
            }
        }
        Ok(StepOutcome::NothingEnabled) => {
            ctx.notifier.info("no enabled checkpoints to upload");
            UploadReport {
                success: true,
                created: 0,
                deleted: 0,
                error: None,
            }
        }
        Err(e) => {
            let message = format!("{e:#}");
            ctx.notifier
                .error(&format!("checkpoint upload failed: {message}"));
            UploadReport {
                success: false,
                created: 0,
                deleted: 0,
                error: Some(message),
            }
        }
    }
}

/// The six upload steps, strictly ordered. Any failure in steps 1-5 stops
/// the sequence; step 6 attributes failures per checkpoint but never rolls
/// back what it already created.
async fn upload_steps(
    arena: &mut CheckpointArena,
    ctx: &UploadContext,
) -> Result<StepOutcome> {
    ctx.notifier.append_line("step 1 of 6: resolving org identity");
    let user_id = ctx
        .tooling
        .current_user_id()
        .await
        .context("failed to resolve org identity")?;
    debug!(%user_id, "resolved org user");

    ctx.notifier
        .append_line("step 2 of 6: waiting for source line information");
    let line_infos = match tokio::time::timeout(
        ctx.line_info_deadline,
        ctx.line_info.line_breakpoint_info(),
    )
    .await
    {
        Ok(result) => result.context("failed to read source line information")?,
        Err(_) => {
            return Err(OrgError::Timeout {
                what: "source line information".to_string(),
            }
            .into())
        }
    };

    ctx.notifier
        .append_line("step 3 of 6: verifying checkpoint count");
    let enabled = arena.enabled();
    if enabled.is_empty() {
        return Ok(StepOutcome::NothingEnabled);
    }
    if enabled.len() > MAX_CHECKPOINTS {
        bail!(
            "{} checkpoints enabled; the limit is {MAX_CHECKPOINTS}",
            enabled.len()
        );
    }

    ctx.notifier
        .append_line("step 4 of 6: resolving type references");
    let mut prepared: Vec<(CheckpointEntry, String)> = Vec::with_capacity(enabled.len());
    for entry in &enabled {
        let info = info_for(&line_infos, &entry.source_path).ok_or_else(|| {
            anyhow!("no line information for {}", entry.source_path)
        })?;
        if !info.lines.contains(&entry.line) {
            bail!(
                "line {} in {} is not a valid checkpoint location",
                entry.line,
                entry.source_path
            );
        }
        prepared.push((entry.clone(), info.type_ref.clone()));
    }

    ctx.notifier
        .append_line("step 5 of 6: removing existing overlay actions");
    let soql = format!("SELECT Id FROM {OVERLAY_ACTION_SOBJECT} WHERE ScopeId = '{user_id}'");
    let existing = ctx
        .tooling
        .query(&soql)
        .await
        .context("failed to query existing overlay actions")?;
    let ids: Vec<String> = existing
        .records
        .iter()
        .filter_map(|record| record.get("Id").and_then(|id| id.as_str()))
        .map(String::from)
        .collect();
    let mut deleted = 0;
    if !ids.is_empty() {
        let batch = ctx
            .tooling
            .batch_delete(OVERLAY_ACTION_SOBJECT, &ids)
            .await
            .context("failed to delete existing overlay actions")?;
        if batch.has_errors {
            bail!("failed to delete one or more existing overlay actions");
        }
        deleted = ids.len();
    }

    ctx.notifier.append_line("step 6 of 6: creating checkpoints");
    let mut created = 0;
    let mut errors: Vec<String> = Vec::new();
    for (entry, type_ref) in prepared {
        let body = serde_json::to_value(entry.overlay_action(&type_ref))
            .context("failed to encode overlay action")?;
        match ctx.tooling.create(OVERLAY_ACTION_SOBJECT, body).await {
            Ok(result) => {
                created += 1;
                if let Some(stored) = arena.entries.iter_mut().find(|e| e.id == entry.id) {
                    stored.action_object_id = Some(result.id);
                    stored.type_ref = Some(type_ref);
                }
            }
            Err(e) => errors.push(map_create_error(&entry, &e)),
        }
    }
    if !errors.is_empty() {
        bail!(errors.join("; "));
    }
    Ok(StepOutcome::Uploaded { created, deleted })
}

fn map_create_error(entry: &CheckpointEntry, error: &anyhow::Error) -> String {
    let at = format!("{}:{}", entry.source_path, entry.line);
    match first_error_code(error) {
        Some(code) if code == FIELD_INTEGRITY_EXCEPTION => {
            format!("{at}: {SOURCE_OUT_OF_SYNC}")
        }
        _ => match error.downcast_ref::<OrgError>() {
            Some(OrgError::Tooling { errors, .. }) if !errors.is_empty() => {
                format!("{at}: {}", errors[0].message)
            }
            _ => format!("{at}: {error:#}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(path: &str, line: u32) -> CheckpointEntry {
        CheckpointEntry::from_breakpoint(path, line, None, None).unwrap()
    }

    #[tokio::test]
    async fn store_commands_apply_in_order() {
        let tmp = TempDir::new().unwrap();
        let service = CheckpointService::spawn(tmp.path().join("checkpoints.json")).unwrap();

        service.upsert(entry("a.cls", 5)).await.unwrap();
        service.upsert(entry("a.cls", 9)).await.unwrap();
        assert_eq!(service.list().await.unwrap().len(), 2);

        assert_eq!(service.toggle("a.cls", 5).await.unwrap(), Some(false));
        assert!(service.remove("a.cls", 9).await.unwrap());
        assert!(!service.remove("a.cls", 9).await.unwrap());

        let remaining = service.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(!remaining[0].enabled);

        assert_eq!(service.clear().await.unwrap(), 1);
        assert!(service.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn the_arena_survives_a_respawn() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("checkpoints.json");
        {
            let service = CheckpointService::spawn(path.clone()).unwrap();
            service.upsert(entry("b.cls", 3)).await.unwrap();
        }
        let service = CheckpointService::spawn(path).unwrap();
        let entries = service.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source_path, "b.cls");
    }

    #[test]
    fn field_integrity_maps_to_the_out_of_sync_message() {
        let entry = entry("file:///p/Foo.cls", 7);
        let error: anyhow::Error = OrgError::Tooling {
            status: 400,
            errors: vec![crate::error::ApiError {
                message: "ExecutableEntityName column invalid".to_string(),
                error_code: FIELD_INTEGRITY_EXCEPTION.to_string(),
            }],
        }
        .into();
        let message = map_create_error(&entry, &error);
        assert!(message.contains(SOURCE_OUT_OF_SYNC));
        assert!(message.starts_with("file:///p/Foo.cls:7"));
    }

    #[test]
    fn other_tooling_errors_surface_their_first_message() {
        let entry = entry("file:///p/Foo.cls", 7);
        let error: anyhow::Error = OrgError::Tooling {
            status: 400,
            errors: vec![crate::error::ApiError {
                message: "storage limit exceeded".to_string(),
                error_code: "LIMIT_EXCEEDED".to_string(),
            }],
        }
        .into();
        let message = map_create_error(&entry, &error);
        assert!(message.contains("storage limit exceeded"));
        assert!(!message.contains(SOURCE_OUT_OF_SYNC));
    }
}
