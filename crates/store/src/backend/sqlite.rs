//! SQLite-backed key-value store using sqlx.
//!
//! Schema: `refresh_tokens(token, form, expires_at)` with `token` as primary
//! key and `expires_at` in unix seconds. Expired rows are invisible to reads
//! and removed by [`SqliteBackend::purge_expired`].

use super::KeyValueBackend;
use async_trait::async_trait;
use refresh_flow_types::{RefreshError, traits::Result};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::str::FromStr;

/// A persistent [`KeyValueBackend`] backed by `SQLite`.
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Connects to a `SQLite` database (e.g. `"sqlite:./refresh_tokens.db"` or `"sqlite::memory:"`).
    ///
    /// Creates the database file and the table if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns a [`sqlx::Error`] if the connection or table creation fails.
    pub async fn new(database_url: &str) -> std::result::Result<Self, sqlx::Error> {
        let opts = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS refresh_tokens (
                token       TEXT    NOT NULL PRIMARY KEY,
                form        TEXT    NOT NULL,
                expires_at  INTEGER NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_expiry ON refresh_tokens(expires_at)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Deletes every expired row and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`RefreshError::Storage`] if the delete fails.
    pub async fn purge_expired(&self) -> Result<u64> {
        let done = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= unixepoch()")
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }
}

#[async_trait]
impl KeyValueBackend for SqliteBackend {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let ttl = i64::try_from(ttl_secs)
            .map_err(|_| RefreshError::Storage(format!("ttl out of range: {ttl_secs}")))?;
        sqlx::query(
            "INSERT INTO refresh_tokens (token, form, expires_at)
             VALUES (?, ?, unixepoch() + ?)
             ON CONFLICT(token) DO UPDATE SET
                 form = excluded.form,
                 expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(ttl)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT form FROM refresh_tokens WHERE token = ? AND expires_at > unixepoch()",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(form,)| form))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM refresh_tokens WHERE token = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
