use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use orgd::{
    auth::OrgAuth,
    cache::PathType,
    checkpoint::{
        line_info::FileLineInfoProvider,
        service::{UploadContext, LINE_INFO_DEADLINE},
        CheckpointEntry,
    },
    config::OrgdConfig,
    conflict::{ConflictTree, TimestampConflictDetector},
    diff::{self, DirectoryDiffResults},
    observability::LatencyTracker,
    tooling::ToolingClient,
    AppContext,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "orgd",
    about = "Org metadata cache-diff and checkpoint upload tool",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Data directory for the timestamp database, checkpoint store, and config
    #[arg(long, env = "ORGD_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Project root the source selectors resolve against (default: current directory)
    #[arg(long, env = "ORGD_PROJECT_DIR")]
    project: Option<std::path::PathBuf>,

    /// Org username the retrieve and upload run against
    #[arg(long, short = 'o', env = "ORGD_USERNAME")]
    org: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "ORGD_LOG")]
    log: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "ORGD_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,

    /// Suppress progress and informational output.
    ///
    /// Errors are still printed to stderr. Use this flag when piping output
    /// to other tools.
    #[arg(long, short = 'q', global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Retrieve a selection from the org and diff it against local source.
    ///
    /// Resolves PATH to metadata components, retrieves their org counterparts
    /// into the per-identity cache directory, and prints every file whose
    /// bytes differ, grouped under the shared directory prefix.
    ///
    /// Examples:
    ///   orgd diff force-app/main/default/classes -o user@example.com
    ///   orgd diff manifest/package.xml --manifest
    ///   orgd diff force-app/main/default/classes/Foo.cls
    Diff {
        /// Folder, file, or manifest to diff
        path: PathBuf,
        /// Treat PATH as a package manifest instead of a source path
        #[arg(long)]
        manifest: bool,
    },
    /// Diff one or more files against their cached org copies.
    ///
    /// The first file drives the retrieve; each file is then matched to a
    /// cached file of the same basename. Files with no cached counterpart
    /// are skipped.
    ///
    /// Examples:
    ///   orgd diff-file force-app/main/default/classes/Foo.cls
    ///   orgd diff-file classes/Foo.cls classes/Foo.cls-meta.xml
    DiffFile {
        /// Files to compare
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Detect files changed in the org since the last recorded sync.
    ///
    /// Like `diff`, but consults the per-org timestamp database first: a
    /// component whose server stamp matches the recorded one is skipped
    /// without reading either side's bytes.
    ///
    /// Examples:
    ///   orgd conflicts force-app -o user@example.com
    Conflicts {
        /// Folder, file, or manifest to check
        path: PathBuf,
        /// Treat PATH as a package manifest instead of a source path
        #[arg(long)]
        manifest: bool,
    },
    /// Record the org's current stamps as the new sync baseline.
    ///
    /// Retrieves the selection and stores each component's server
    /// modification stamp; later `conflicts` runs treat those versions as
    /// already seen.
    ///
    /// Examples:
    ///   orgd mark-synced force-app -o user@example.com
    MarkSynced {
        /// Folder, file, or manifest to record
        path: PathBuf,
        /// Treat PATH as a package manifest instead of a source path
        #[arg(long)]
        manifest: bool,
    },
    /// Manage checkpoints and upload them to the org.
    Checkpoints {
        #[command(subcommand)]
        action: CheckpointsAction,
    },
    /// Manage the per-identity retrieve cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CheckpointsAction {
    /// List stored checkpoints.
    ///
    /// Examples:
    ///   orgd checkpoints list
    List,
    /// Add or replace the checkpoint at --file/--line.
    ///
    /// The hit condition must be a whole number between 1 and 255 — the
    /// iteration the overlay action fires on. The log message becomes the
    /// action script: messages starting with `select` run as SOQL, anything
    /// else as Apex.
    ///
    /// Examples:
    ///   orgd checkpoints add --file classes/Foo.cls --line 12
    ///   orgd checkpoints add --file classes/Foo.cls --line 12 --hit-condition 3
    ///   orgd checkpoints add --file classes/Foo.cls --line 12 --log-message "select Id from Account"
    Add {
        /// Source file the checkpoint lives in
        #[arg(long)]
        file: String,
        /// 1-based line number
        #[arg(long)]
        line: u32,
        /// Iteration to fire on (1-255, default 1)
        #[arg(long)]
        hit_condition: Option<String>,
        /// Action script; `select ...` for SOQL, anything else for Apex
        #[arg(long)]
        log_message: Option<String>,
        /// Store the checkpoint disabled
        #[arg(long)]
        disabled: bool,
    },
    /// Remove the checkpoint at FILE:LINE.
    ///
    /// Examples:
    ///   orgd checkpoints remove classes/Foo.cls 12
    Remove {
        /// Source file the checkpoint lives in
        file: String,
        /// 1-based line number
        line: u32,
    },
    /// Flip the enabled state of the checkpoint at FILE:LINE.
    ///
    /// Examples:
    ///   orgd checkpoints toggle classes/Foo.cls 12
    Toggle {
        /// Source file the checkpoint lives in
        file: String,
        /// 1-based line number
        line: u32,
    },
    /// Delete every stored checkpoint.
    Clear,
    /// Upload enabled checkpoints to the org as overlay actions.
    ///
    /// Runs the six-step sequence: resolve the org identity, wait for line
    /// info, validate the count and line positions, delete the user's
    /// existing overlay actions, then create one action per enabled
    /// checkpoint. At most five checkpoints may be enabled.
    ///
    /// Examples:
    ///   orgd checkpoints upload -o user@example.com
    Upload,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Delete the org identity's cache directory.
    ///
    /// Examples:
    ///   orgd cache clear -o user@example.com
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = OrgdConfig::new(args.data_dir, args.project, args.org, args.log);

    // ── Logging setup ────────────────────────────────────────────────────────
    // Init once — must happen before any tracing calls.
    let _file_guard = setup_logging(&config.log, args.log_file.as_deref(), &config.log_format);

    let quiet = args.quiet;
    let ctx = AppContext::new(config, quiet).await?;

    match args.command {
        Command::Diff { path, manifest } => run_diff(&ctx, &path, manifest).await?,
        Command::DiffFile { paths } => run_diff_file(&ctx, &paths).await?,
        Command::Conflicts { path, manifest } => run_conflicts(&ctx, &path, manifest).await?,
        Command::MarkSynced { path, manifest } => run_mark_synced(&ctx, &path, manifest).await?,
        Command::Checkpoints { action } => run_checkpoints(&ctx, action, quiet).await?,
        Command::Cache { action } => match action {
            CacheAction::Clear => run_cache_clear(&ctx).await?,
        },
    }

    Ok(())
}

/// Initialize the tracing subscriber.
/// If `log_file` is set, logs go to both stdout and a daily-rolling file.
/// Returns a `WorkerGuard` that must stay alive for the process lifetime.
///
/// `log_format` may be `"pretty"` (default, human-readable compact format) or
/// `"json"` (structured JSON for log aggregators).
///
/// If the log directory cannot be created, falls back to stdout-only logging
/// with a warning — never panics.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let use_json = log_format == "json";

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("orgd.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            // Fall back to stdout-only — don't panic on a bad log path.
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            if use_json {
                tracing_subscriber::fmt().json().with_env_filter(log_level).init();
            } else {
                tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
            }
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact())
                .with(fmt::layer().with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else if use_json {
        tracing_subscriber::fmt().json().with_env_filter(log_level).init();
        None
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        None
    }
}

/// The org username for this invocation: `-o` flag, ORGD_USERNAME, or the
/// config file — whichever is set first.
fn required_username(ctx: &AppContext) -> Result<String> {
    match &ctx.config.username {
        Some(username) => Ok(username.clone()),
        None => bail!("no org username configured; pass -o/--org or set ORGD_USERNAME"),
    }
}

/// Load the cache for the selector and render every differing file.
async fn run_diff(ctx: &AppContext, path: &Path, manifest: bool) -> Result<()> {
    let username = required_username(ctx)?;
    let mut service = ctx.cache_service(&username);
    let Some(result) = service
        .load_cache(path, &ctx.config.project_dir, manifest)
        .await?
    else {
        ctx.notifier.info("selection resolved to no components");
        return Ok(());
    };
    let diffs = match result.selected_type {
        PathType::Individual => diff::diff_multiple_files(&result, &[path.to_path_buf()])?,
        _ => diff::diff_folder(&result)?,
    };
    render_results(ctx, &username, &diffs);
    Ok(())
}

/// Single- or multi-file diff against the cached counterparts.
async fn run_diff_file(ctx: &AppContext, paths: &[PathBuf]) -> Result<()> {
    let username = required_username(ctx)?;
    let Some(selector) = paths.first() else {
        bail!("no file given");
    };
    let mut service = ctx.cache_service(&username);
    let Some(result) = service
        .load_cache(selector, &ctx.config.project_dir, false)
        .await?
    else {
        ctx.notifier.info("selection resolved to no components");
        return Ok(());
    };
    if paths.len() > 1 {
        let diffs = diff::diff_multiple_files(&result, paths)?;
        render_results(ctx, &username, &diffs);
        return Ok(());
    }
    match diff::diff_one_file(&result, selector)? {
        None => ctx
            .notifier
            .warn(&format!("no cached counterpart for {}", selector.display())),
        Some(pair) => {
            if diff::files_differ(&pair.project_path, &pair.cache_path)? {
                ctx.notifier.info(&format!(
                    "{} differs from the org copy at {}",
                    pair.project_path.display(),
                    pair.cache_path.display()
                ));
            } else {
                ctx.notifier
                    .info(&format!("{} matches the org copy", pair.project_path.display()));
            }
        }
    }
    Ok(())
}

/// Timestamp-gated conflict detection over a freshly loaded cache.
async fn run_conflicts(ctx: &AppContext, path: &Path, manifest: bool) -> Result<()> {
    let username = required_username(ctx)?;
    let tracker = LatencyTracker::start("conflicts.detect");
    let mut service = ctx.cache_service(&username);
    let result = service
        .load_cache(path, &ctx.config.project_dir, manifest)
        .await?;
    let detector = TimestampConflictDetector::new(ctx.storage.clone());
    let diffs = detector.create_diffs(&username, result.as_ref()).await?;
    tracker.finish_with_items(diffs.different.len());
    render_results(ctx, &username, &diffs);
    Ok(())
}

/// Retrieve the selection and record the reported server stamps.
async fn run_mark_synced(ctx: &AppContext, path: &Path, manifest: bool) -> Result<()> {
    let username = required_username(ctx)?;
    let mut service = ctx.cache_service(&username);
    let Some(result) = service
        .load_cache(path, &ctx.config.project_dir, manifest)
        .await?
    else {
        ctx.notifier.info("selection resolved to no components");
        return Ok(());
    };
    let project_path = result.project.base_directory.to_string_lossy().into_owned();
    let written = ctx
        .storage
        .set_timestamps(&username, &project_path, &result.properties)
        .await?;
    ctx.notifier
        .info(&format!("recorded {written} server stamp(s) for {username}"));
    Ok(())
}

async fn run_checkpoints(ctx: &AppContext, action: CheckpointsAction, quiet: bool) -> Result<()> {
    match action {
        CheckpointsAction::List => {
            let entries = ctx.checkpoints.list().await?;
            if entries.is_empty() {
                println!("No checkpoints stored.");
            } else {
                println!("{:<9} {:<6} {:<5} SOURCE", "ENABLED", "LINE", "ITER");
                println!("{}", "-".repeat(72));
                for e in &entries {
                    println!(
                        "{:<9} {:<6} {:<5} {}",
                        if e.enabled { "yes" } else { "no" },
                        e.line,
                        e.iteration,
                        e.source_path
                    );
                }
                println!("\n{} checkpoint(s)", entries.len());
            }
        }

        CheckpointsAction::Add {
            file,
            line,
            hit_condition,
            log_message,
            disabled,
        } => {
            let mut entry = CheckpointEntry::from_breakpoint(
                file,
                line,
                hit_condition.as_deref(),
                log_message.as_deref(),
            )?;
            if disabled {
                entry.enabled = false;
            }
            let location = format!("{}:{}", entry.source_path, entry.line);
            ctx.checkpoints.upsert(entry).await?;
            if !quiet {
                println!("Added checkpoint at {location}");
            }
        }

        CheckpointsAction::Remove { file, line } => {
            if ctx.checkpoints.remove(&file, line).await? {
                if !quiet {
                    println!("Removed checkpoint at {file}:{line}");
                }
            } else {
                eprintln!("No checkpoint at {file}:{line}");
                std::process::exit(1);
            }
        }

        CheckpointsAction::Toggle { file, line } => match ctx.checkpoints.toggle(&file, line).await? {
            Some(true) => {
                if !quiet {
                    println!("Enabled checkpoint at {file}:{line}");
                }
            }
            Some(false) => {
                if !quiet {
                    println!("Disabled checkpoint at {file}:{line}");
                }
            }
            None => {
                eprintln!("No checkpoint at {file}:{line}");
                std::process::exit(1);
            }
        },

        CheckpointsAction::Clear => {
            let count = ctx.checkpoints.clear().await?;
            if !quiet {
                println!("Cleared {count} checkpoint(s)");
            }
        }

        CheckpointsAction::Upload => run_checkpoint_upload(ctx).await?,
    }
    Ok(())
}

/// Wire the live collaborators and run the upload sequence.
async fn run_checkpoint_upload(ctx: &AppContext) -> Result<()> {
    let username = required_username(ctx)?;
    let auth = OrgAuth::resolve(&ctx.config, &username).await?;
    let tooling = Arc::new(ToolingClient::new(auth)?);
    let line_info = Arc::new(FileLineInfoProvider::new(ctx.config.line_info_file()));
    let report = ctx
        .checkpoints
        .upload(UploadContext {
            tooling,
            line_info,
            line_info_deadline: LINE_INFO_DEADLINE,
            username,
            notifier: ctx.notifier.clone(),
        })
        .await?;
    if !report.success {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_cache_clear(ctx: &AppContext) -> Result<()> {
    let username = required_username(ctx)?;
    ctx.cache_service(&username).clear_cache().await?;
    ctx.notifier.info(&format!("cache cleared for {username}"));
    Ok(())
}

/// Print the conflict tree, directories before files, stamps where known.
fn render_results(ctx: &AppContext, username: &str, diffs: &DirectoryDiffResults) {
    let tree = ConflictTree::from_results(username, diffs);
    if tree.is_empty() {
        ctx.notifier.info("no differences found");
        return;
    }
    for row in tree.rows() {
        let indent = "  ".repeat(row.depth);
        let stamps = match (&row.local_stamp, &row.remote_stamp) {
            (Some(local), Some(remote)) => format!("  (local {local}, org {remote})"),
            (None, Some(remote)) => format!("  (org {remote})"),
            _ => String::new(),
        };
        ctx.notifier
            .append_line(&format!("{indent}{}{stamps}", row.label));
    }
    ctx.notifier
        .info(&format!("{} file(s) differ", tree.conflict_count()));
}
