pub mod chunks;
pub mod files;
pub mod models;
pub mod users;
pub mod versions;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use thiserror::Error;

pub type DbPool = Pool<Sqlite>;

// Re-export commonly used types
pub use models::{ChunkInfo, FileChunk, FileInfo, FileVersion, User, UserStats};

/// Storage-engine failures, kept as distinct categories so handlers can map
/// them onto HTTP statuses without string matching.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The identity does not resolve, or resolves to another user.
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("quota exceeded")]
    QuotaExceeded,
    /// A chunk already exists at this position with a different hash.
    #[error("chunk conflict")]
    ChunkConflict,
    #[error("chunk number out of range")]
    ChunkOutOfRange,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl StoreError {
    /// Translate a unique-constraint violation into a Conflict; everything
    /// else stays a database error.
    fn on_unique(err: sqlx::Error, what: &str) -> StoreError {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(format!("{} already exists", what))
            }
            _ => StoreError::Db(err),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Open (creating if missing) the single database file.
pub async fn create_pool(database_path: impl AsRef<Path>) -> anyhow::Result<DbPool> {
    let options = SqliteConnectOptions::new()
        .filename(database_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Run database migrations using SQLx's built-in migration tracking.
pub async fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Increment the owner's revision counter. Must run inside the same
/// transaction as the mutation it accounts for.
pub(crate) async fn bump_revision(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    user_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE user_stats SET revision = revision + 1 WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> DbPool {
    use std::str::FromStr;
    // A single connection keeps every query on the same in-memory database.
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("in-memory options")
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("in-memory pool");
    run_migrations(&pool).await.expect("migrations");
    pool
}

#[cfg(test)]
pub(crate) async fn test_user(pool: &DbPool, name: &str, quota: i64) -> models::User {
    users::add_user(pool, name, b"salt", b"salted-hash", quota)
        .await
        .expect("test user")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_pool_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("freezer.db");

        let pool = create_pool(&path).await.unwrap();
        run_migrations(&pool).await.unwrap();

        assert!(path.exists());
        // Running migrations again is a no-op thanks to the tracking table.
        run_migrations(&pool).await.unwrap();
    }
}
