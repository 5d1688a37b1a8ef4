use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Pool, Sqlite,
};
use std::str::FromStr;
use tokio::time::Duration;
use tracing::{info, instrument, warn};

use crate::TARGET_DB;

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Get access to the database pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

// Helper method to check if an sqlx error is a database lock error
pub trait DbLockErrorExt {
    fn is_database_lock_error(&self) -> bool;
}

impl DbLockErrorExt for sqlx::Error {
    fn is_database_lock_error(&self) -> bool {
        match self {
            // SQLITE_BUSY, SQLITE_LOCKED and their extended codes
            sqlx::Error::Database(err) => err
                .code()
                .is_some_and(|c| matches!(c.as_ref(), "5" | "6" | "261" | "262" | "517")),
            _ => false,
        }
    }
}

/// Timestamps are stored as RFC3339 UTC text with second precision so that they
/// compare correctly as strings
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parses a stored or imported timestamp; accepts RFC3339 and `YYYY-MM-DD HH:MM:SS`
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

impl Database {
    /// Opens (creating if missing) the SQLite database at `database_path`
    #[instrument(target = "db", level = "info")]
    pub async fn new(database_path: &str) -> Result<Self, sqlx::Error> {
        info!(target: TARGET_DB, "Creating database pool for: {}", database_path);

        let connect_options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", database_path))?
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_secs(5))
                .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;

        info!(target: TARGET_DB, "Database pool created");

        let db = Database { pool };
        db.initialize_schema().await?;

        Ok(db)
    }

    /// Private in-memory database, used by tests and dry runs
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        // A single connection that is never recycled; each new connection would see its
        // own empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let db = Database { pool };
        db.initialize_schema().await?;
        Ok(db)
    }

    /// Round trip to the database; a failure here means the store is unavailable
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        match sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(self.pool())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(target: TARGET_DB, "Database health check failed: {}", e);
                Err(e)
            }
        }
    }
}
