//! SQLite-based history store

use crate::core::BuildResult;
use crate::persistence::{retained, HistoryStore};
use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

/// SQLite build history store
///
/// Each result is stored as a JSON document next to the columns used for
/// ordering and filtering.
pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    /// Create a new SQLite store
    pub async fn new(db_path: &str) -> Result<Self> {
        // An in-memory database lives only as long as its connection
        let (url, max_connections) = if db_path == ":memory:" {
            ("sqlite::memory:".to_string(), 1)
        } else {
            (format!("sqlite:{}?mode=rwc", db_path), 5)
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&url)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("build-pipeline");
        tokio::fs::create_dir_all(&db_dir).await?;

        let db_path = db_dir.join("history.db");
        let db_path = db_path
            .to_str()
            .context("Database path is not valid UTF-8")?;
        Self::new(db_path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS build_history (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                build_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                environment TEXT NOT NULL,
                success INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                document TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_build_id ON build_history(build_id);
            CREATE INDEX IF NOT EXISTS idx_combination ON build_history(platform, environment);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn load(&self) -> Result<Vec<BuildResult>> {
        let rows = sqlx::query("SELECT document FROM build_history ORDER BY seq ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to load build history")?;

        rows.iter()
            .map(|row| {
                let document: String = row.get("document");
                serde_json::from_str(&document).context("Corrupt build history row")
            })
            .collect()
    }

    async fn save(&self, history: &[BuildResult]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM build_history")
            .execute(&mut *tx)
            .await
            .context("Failed to clear build history")?;

        for result in retained(history) {
            sqlx::query(
                r#"
                INSERT INTO build_history
                (id, build_id, platform, environment, success, started_at, document)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(result.id.to_string())
            .bind(&result.build_id)
            .bind(&result.platform)
            .bind(&result.environment)
            .bind(result.success)
            .bind(result.started_at.naive_utc())
            .bind(serde_json::to_string(result)?)
            .execute(&mut *tx)
            .await
            .context("Failed to save build history")?;
        }

        tx.commit().await?;
        Ok(())
    }
}
