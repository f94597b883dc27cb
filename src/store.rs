mod files;
mod publish;
mod types;
mod users;
mod vaults;

pub use types::{
    DeletedEntry, FileContent, FileMeta, HistoryEntry, NewFileMeta, PublishFile, Share, Site,
    SlugInfo, User, Vault,
};

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};

use crate::error::ServerError;

/// Central store handle. Cheap to clone (the pool is an Arc internally).
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (or creates) the SQLite database at `db_path` and runs pending
    /// migrations.
    ///
    /// WAL journal mode is configured at connection time, not inside a
    /// migration: SQLite forbids changing `journal_mode` inside a transaction
    /// and sqlx wraps every migration in one.
    pub async fn open(db_path: &Path) -> Result<Self, ServerError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(opts).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| ServerError::Internal(format!("migration: {e}")))?;

        Ok(Self { pool })
    }

    /// An isolated in-memory database for tests. Single connection so every
    /// query sees the same memory store.
    #[cfg(test)]
    pub async fn open_in_memory() -> Self {
        use sqlx::sqlite::SqlitePoolOptions;

        let opts = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .expect("open in-memory database");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("run migrations");

        Self { pool }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Milliseconds since the Unix epoch, the timestamp unit of the protocol.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let store = Store::open_in_memory().await;

        for table in [
            "users",
            "vaults",
            "shares",
            "files",
            "sites",
            "publish_files",
        ] {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(table)
            .fetch_one(store.pool())
            .await
            .expect("query sqlite_master");
            assert_eq!(count, 1, "missing table {table}");
        }
    }

    #[test]
    fn now_millis_is_in_milliseconds() {
        let ms = now_millis();
        // Anything after 2020 in ms is 13 digits; a seconds value would be 10.
        assert!(ms > 1_577_836_800_000);
    }
}
