//! Pooled SQLx connection shared by every repository.
//!
//! Booking writes hold a transaction across the ledger, booking and payment rows, so
//! the pool is sized from configuration rather than fixed.

use crate::error::DbError;
use carematch_config::{AppConfig, DatabaseConfig};
use sqlx::any::AnyConnectOptions;
use sqlx::pool::PoolOptions;
use sqlx::{Any, Pool, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

pub type DbTransaction<'a> = Transaction<'a, Any>;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct DbClient {
    pool: Pool<Any>,
}

impl DbClient {
    /// Connects using the `[database]` section; a missing section is a configuration error.
    pub async fn new(config: &Arc<AppConfig>) -> Result<Self, DbError> {
        match config.database.as_ref() {
            Some(section) => Self::from_config(section).await,
            None => Err(DbError::ConfigError(
                "[database] section is missing".to_string(),
            )),
        }
    }

    pub async fn from_config(section: &DatabaseConfig) -> Result<Self, DbError> {
        if section.url.trim().is_empty() {
            return Err(DbError::ConfigError("database.url is empty".to_string()));
        }
        Self::connect(&section.url, section.max_connections.max(1)).await
    }

    /// Used by tests and tooling that only have a URL at hand.
    pub async fn from_url(url: &str) -> Result<Self, DbError> {
        if url.trim().is_empty() {
            return Err(DbError::UrlError("empty database URL".to_string()));
        }
        Self::connect(url, DEFAULT_MAX_CONNECTIONS).await
    }

    async fn connect(url: &str, max_connections: u32) -> Result<Self, DbError> {
        sqlx::any::install_default_drivers();

        if let Some(file) = sqlite_file(url) {
            prepare_sqlite_file(file)?;
        }

        let options = AnyConnectOptions::from_str(url)?;
        let pool = PoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .idle_timeout(IDLE_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| {
                error!("Could not open database pool: {}", e);
                DbError::PoolError(e.to_string())
            })?;

        info!(max_connections, "Database pool ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Any> {
        &self.pool
    }

    /// Starts the transaction a booking write runs in.
    pub async fn begin(&self) -> Result<DbTransaction<'_>, DbError> {
        self.pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionError(e.to_string()))
    }

    /// Runs a statement without bind parameters and returns the affected row count.
    pub async fn execute(&self, statement: &str) -> Result<u64, DbError> {
        let result = sqlx::query(statement)
            .execute(&self.pool)
            .await
            .map_err(|e| DbError::QueryError(e.to_string()))?;
        Ok(result.rows_affected())
    }

    pub async fn init_schema(&self) -> Result<(), DbError> {
        crate::schema::init_schema(self).await
    }

    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

/// The on-disk path of a file-backed SQLite URL, `None` for other drivers and `:memory:`.
fn sqlite_file(url: &str) -> Option<&str> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path.contains(":memory:") {
        None
    } else {
        Some(path)
    }
}

/// `AnyConnectOptions` has no `create_if_missing`, so the file and its directory are made here.
fn prepare_sqlite_file(file: &str) -> Result<(), DbError> {
    let path = Path::new(file);
    if path.exists() {
        return Ok(());
    }
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| {
            DbError::PoolError(format!("cannot create {}: {}", dir.display(), e))
        })?;
    }
    debug!(file, "Creating SQLite database file");
    std::fs::File::create(path)
        .map(|_| ())
        .map_err(|e| DbError::PoolError(format!("cannot create {}: {}", file, e)))
}

#[cfg(test)]
mod tests {
    use super::sqlite_file;

    #[test]
    fn test_sqlite_file_extraction() {
        assert_eq!(sqlite_file("sqlite://data/app.db"), Some("data/app.db"));
        assert_eq!(sqlite_file("sqlite:app.db?mode=rwc"), Some("app.db"));
        assert_eq!(sqlite_file("sqlite::memory:"), None);
        assert_eq!(sqlite_file("postgres://localhost/app"), None);
    }
}
