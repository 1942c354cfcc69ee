use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_API_VERSION: &str = "61.0";
const DEFAULT_SF_BINARY: &str = "sf";
const DEFAULT_PACKAGE_DIR: &str = "force-app";
const DEFAULT_RETRIEVE_TIMEOUT_SECS: u64 = 300;
/// Queries slower than this are logged at WARN; 0 disables the check.
const DEFAULT_SLOW_QUERY_MS: u64 = 100;

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{data_dir}/config.toml` — all fields are optional overrides.
/// Priority: CLI / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// Log level filter string, e.g. "debug", "info,orgd=trace" (default: "info").
    log: Option<String>,
    /// Log output format: "pretty" (default, human-readable) | "json".
    log_format: Option<String>,
    /// Default org username when the CLI flag is omitted.
    username: Option<String>,
    /// Metadata API version (default: 61.0).
    api_version: Option<String>,
    /// Org CLI executable used for retrieves and auth fallback (default: "sf").
    sf_binary: Option<String>,
    /// Source package directories relative to the project root
    /// (default: ["force-app"]).
    package_dirs: Option<Vec<String>>,
    /// Root of the per-org retrieve cache (default: OS temp dir + .orgd/diff).
    cache_root: Option<PathBuf>,
    /// Ceiling for one metadata retrieve, in seconds (default: 300).
    retrieve_timeout_secs: Option<u64>,
    /// Org instance URL; pairs with `access_token` to skip the CLI auth
    /// fallback.
    instance_url: Option<String>,
    /// Org access token; pairs with `instance_url`.
    access_token: Option<String>,
    /// Where the Apex language server writes line breakpoint info
    /// (default: {project_dir}/.orgd/line-info.json).
    line_info_path: Option<PathBuf>,
    /// Log SQLite queries slower than this many milliseconds (default: 100;
    /// 0 disables).
    slow_query_threshold_ms: Option<u64>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── OrgdConfig ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OrgdConfig {
    pub data_dir: PathBuf,
    /// Project root the source selectors resolve against.
    pub project_dir: PathBuf,
    pub log: String,
    /// "pretty" | "json" (ORGD_LOG_FORMAT env var).
    pub log_format: String,
    /// Default org username (ORGD_USERNAME env var); CLI `-o` wins.
    pub username: Option<String>,
    pub api_version: String,
    /// Org CLI executable (ORGD_SF_BINARY env var).
    pub sf_binary: String,
    pub package_dirs: Vec<String>,
    pub cache_root: PathBuf,
    pub retrieve_timeout_secs: u64,
    /// Explicit credentials (ORGD_INSTANCE_URL / ORGD_ACCESS_TOKEN env
    /// vars); both set = CLI auth fallback skipped.
    pub instance_url: Option<String>,
    pub access_token: Option<String>,
    pub line_info_path: Option<PathBuf>,
    pub slow_query_threshold_ms: u64,
}

impl OrgdConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(
        data_dir: Option<PathBuf>,
        project_dir: Option<PathBuf>,
        username: Option<String>,
        log: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        // Load TOML as the lowest-priority override layer
        let toml = load_toml(&data_dir).unwrap_or_default();

        let project_dir = project_dir.unwrap_or_else(|| PathBuf::from("."));
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let log_format = std::env::var("ORGD_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let username = username
            .or(std::env::var("ORGD_USERNAME").ok().filter(|s| !s.is_empty()))
            .or(toml.username);

        let api_version = std::env::var("ORGD_API_VERSION")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.api_version)
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

        let sf_binary = std::env::var("ORGD_SF_BINARY")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.sf_binary)
            .unwrap_or_else(|| DEFAULT_SF_BINARY.to_string());

        let package_dirs = toml
            .package_dirs
            .filter(|dirs| !dirs.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_PACKAGE_DIR.to_string()]);

        let cache_root = toml
            .cache_root
            .unwrap_or_else(|| std::env::temp_dir().join(".orgd").join("diff"));

        let retrieve_timeout_secs = toml
            .retrieve_timeout_secs
            .unwrap_or(DEFAULT_RETRIEVE_TIMEOUT_SECS);

        let instance_url = std::env::var("ORGD_INSTANCE_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.instance_url);

        let access_token = std::env::var("ORGD_ACCESS_TOKEN")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.access_token);

        let slow_query_threshold_ms = toml
            .slow_query_threshold_ms
            .unwrap_or(DEFAULT_SLOW_QUERY_MS);

        Self {
            data_dir,
            project_dir,
            log,
            log_format,
            username,
            api_version,
            sf_binary,
            package_dirs,
            cache_root,
            retrieve_timeout_secs,
            instance_url,
            access_token,
            line_info_path: toml.line_info_path,
            slow_query_threshold_ms,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("orgd.db")
    }

    pub fn checkpoints_path(&self) -> PathBuf {
        self.data_dir.join("checkpoints.json")
    }

    /// Where the language server's line breakpoint info is read from.
    pub fn line_info_file(&self) -> PathBuf {
        self.line_info_path
            .clone()
            .unwrap_or_else(|| self.project_dir.join(".orgd").join("line-info.json"))
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/orgd
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("orgd");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/orgd or ~/.local/share/orgd
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("orgd");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local").join("share").join("orgd");
        }
    }
    #[cfg(target_os = "windows")]
    {
        // %APPDATA%\orgd
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("orgd");
        }
    }
    // Fallback
    PathBuf::from(".orgd")
}
