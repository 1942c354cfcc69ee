use anyhow::{Context as _, Result};
use chrono::Utc;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};

use crate::cache::props::FileProperties;

/// Timeout for individual SQLite queries; a hung query must never stall a
/// diff pass.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Execute a future with the standard query timeout.
async fn with_timeout<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
            "database query timed out after {}s",
            QUERY_TIMEOUT.as_secs()
        )),
    }
}

/// Identity of one persisted timestamp row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampKey {
    pub org_username: String,
    pub project_path: String,
    pub type_name: String,
    pub full_name: String,
}

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(db_path: &Path) -> Result<Self> {
        Self::new_with_slow_query(db_path, 0).await
    }

    /// Create storage with slow-query logging enabled.
    ///
    /// `slow_query_ms` is the threshold in milliseconds — queries exceeding
    /// it are logged at WARN level. Set to 0 to disable slow-query logging.
    pub async fn new_with_slow_query(db_path: &Path, slow_query_ms: u64) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);

        if slow_query_ms > 0 {
            use sqlx::ConnectOptions;
            opts = opts.log_slow_statements(
                log::LevelFilter::Warn,
                std::time::Duration::from_millis(slow_query_ms),
            );
        }

        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::migrate!("src/storage/migrations")
            .run(pool)
            .await
            .context("Failed to run database migrations")
    }

    // ─── Timestamps ─────────────────────────────────────────────────────────

    /// Last-synced modification stamp for one component, or `None` when the
    /// component has never been marked synced.
    pub async fn get_timestamp(&self, key: &TimestampKey) -> Result<Option<String>> {
        with_timeout(async {
            let row: Option<(String,)> = sqlx::query_as(
                "SELECT last_modified_date FROM timestamp_properties
                 WHERE org_username = ? AND project_path = ? AND metadata_type = ? AND full_name = ?",
            )
            .bind(&key.org_username)
            .bind(&key.project_path)
            .bind(&key.type_name)
            .bind(&key.full_name)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row.map(|(stamp,)| stamp))
        })
        .await
    }

    /// Upsert one stamp; last write wins.
    pub async fn set_timestamp(&self, key: &TimestampKey, last_modified_date: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        with_timeout(async {
            sqlx::query(
                "INSERT INTO timestamp_properties
                     (org_username, project_path, metadata_type, full_name, last_modified_date, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(org_username, project_path, metadata_type, full_name)
                 DO UPDATE SET last_modified_date = excluded.last_modified_date,
                               updated_at = excluded.updated_at",
            )
            .bind(&key.org_username)
            .bind(&key.project_path)
            .bind(&key.type_name)
            .bind(&key.full_name)
            .bind(last_modified_date)
            .bind(&now)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// Record every reported server stamp after a successful retrieve.
    /// Returns how many rows were written.
    pub async fn set_timestamps(
        &self,
        org_username: &str,
        project_path: &str,
        properties: &[FileProperties],
    ) -> Result<usize> {
        for property in properties {
            let key = TimestampKey {
                org_username: org_username.to_string(),
                project_path: project_path.to_string(),
                type_name: property.type_name.clone(),
                full_name: property.full_name.clone(),
            };
            self.set_timestamp(&key, &property.last_modified_date)
                .await?;
        }
        Ok(properties.len())
    }

    /// Drop every stamp recorded for an org/project pair.
    pub async fn clear_org(&self, org_username: &str, project_path: &str) -> Result<u64> {
        with_timeout(async {
            let result = sqlx::query(
                "DELETE FROM timestamp_properties WHERE org_username = ? AND project_path = ?",
            )
            .bind(org_username)
            .bind(project_path)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }
}
