//! Database connection management and migrations.

use crate::error::Result;

use anyhow::Context as _;
use sqlx::SqlitePool;
use std::path::Path;

/// SQLite connection bundle for case persistence.
pub struct Db {
    pub sqlite: SqlitePool,
}

impl Db {
    /// Connect to the database and run migrations.
    pub async fn connect(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).with_context(|| {
            format!("failed to create data directory: {}", data_dir.display())
        })?;

        let sqlite_url = format!("sqlite:{}?mode=rwc", data_dir.join("farmpilot.db").display());
        let sqlite = SqlitePool::connect(&sqlite_url)
            .await
            .with_context(|| "failed to connect to SQLite")?;

        sqlx::migrate!("./migrations")
            .run(&sqlite)
            .await
            .with_context(|| "failed to run database migrations")?;

        Ok(Self { sqlite })
    }

    /// Close the connection pool gracefully.
    pub async fn close(self) {
        self.sqlite.close().await;
    }
}
