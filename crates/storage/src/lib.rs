use anyhow::{Context, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::{domain::QueueItem, protocol::SettingsPayload};

const KEY_TOKEN: &str = "token";
const KEY_USER_SETTINGS: &str = "userSettings";
const KEY_OFFLINE_QUEUE: &str = "offlineQueue";

/// String-keyed persistent store backing the sync engine. Values are JSON
/// documents; the schema is a single key/value table so the on-disk layout
/// matches the three documented keys one to one.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        let storage = Self { pool };
        storage.ensure_schema().await?;
        Ok(storage)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS app_state (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure app_state table exists")?;
        Ok(())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO app_state (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write key '{key}'"))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM app_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read key '{key}'"))?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM app_state WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete key '{key}'"))?;
        Ok(())
    }

    pub async fn save_token(&self, token: &str) -> Result<()> {
        self.put(KEY_TOKEN, token).await
    }

    pub async fn load_token(&self) -> Result<Option<String>> {
        self.get(KEY_TOKEN).await
    }

    pub async fn clear_token(&self) -> Result<()> {
        self.delete(KEY_TOKEN).await
    }

    pub async fn save_settings(&self, settings: &SettingsPayload) -> Result<()> {
        let encoded = serde_json::to_string(settings).context("failed to encode settings")?;
        self.put(KEY_USER_SETTINGS, &encoded).await
    }

    /// Returns the last-persisted settings document. A corrupt value
    /// surfaces as an error; the caller decides whether to fall back to
    /// defaults.
    pub async fn load_settings(&self) -> Result<Option<SettingsPayload>> {
        let Some(raw) = self.get(KEY_USER_SETTINGS).await? else {
            return Ok(None);
        };
        let settings =
            serde_json::from_str(&raw).context("stored settings document is corrupt")?;
        Ok(Some(settings))
    }

    /// Replaces the persisted queue wholesale. The engine's invariant is
    /// that after any successful queue mutation the persisted queue equals
    /// the in-memory queue, so partial updates are never expressed here.
    pub async fn save_queue(&self, items: &[QueueItem]) -> Result<()> {
        let encoded = serde_json::to_string(items).context("failed to encode offline queue")?;
        self.put(KEY_OFFLINE_QUEUE, &encoded).await
    }

    pub async fn load_queue(&self) -> Result<Vec<QueueItem>> {
        let Some(raw) = self.get(KEY_OFFLINE_QUEUE).await? else {
            return Ok(Vec::new());
        };
        let items = serde_json::from_str(&raw).context("stored offline queue is corrupt")?;
        Ok(items)
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
