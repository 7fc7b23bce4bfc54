use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

const SCHEMA_META_TABLE: &str = "
CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)";

/// Open (creating if needed) the SQLite database shared by accounts and
/// chat history.
pub async fn open_pool(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create database directory {}", parent.display()))?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| format!("open database {}", path.display()))?;

    tracing::debug!(path = %path.display(), "Opened SQLite database");
    Ok(pool)
}

/// In-memory database on a single connection, for tests and ephemeral runs.
pub async fn open_memory_pool() -> Result<SqlitePool> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .context("open in-memory database")
}

/// Record `version` for `key` on first use and refuse to run against any
/// other stored version.
pub async fn ensure_schema_version(pool: &SqlitePool, key: &str, version: u32) -> Result<()> {
    sqlx::query(SCHEMA_META_TABLE)
        .execute(pool)
        .await
        .context("create schema_meta table")?;

    let stored: Option<(String,)> = sqlx::query_as("SELECT value FROM schema_meta WHERE key = $1")
        .bind(key)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("load schema version for {key}"))?;

    if let Some((value,)) = stored {
        let parsed = value
            .parse::<u32>()
            .with_context(|| format!("invalid schema version value for {key}: {value}"))?;
        anyhow::ensure!(
            parsed == version,
            "incompatible {key} schema: stored={parsed}, expected={version}; remove the database and restart"
        );
        return Ok(());
    }

    sqlx::query("INSERT INTO schema_meta (key, value) VALUES ($1, $2)")
        .bind(key)
        .bind(version.to_string())
        .execute(pool)
        .await
        .with_context(|| format!("persist schema version for {key}"))?;

    Ok(())
}
