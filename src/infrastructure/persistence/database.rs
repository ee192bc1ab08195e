use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Shared connection pool, opened once at startup.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to connect to SQLite database")?;

        info!(db_url, "connected to database");

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stops (
                symbol TEXT PRIMARY KEY,
                entry_price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                stop_loss TEXT NOT NULL,
                take_profit TEXT NOT NULL,
                backup_stop_order_id TEXT,
                backup_tp_order_id TEXT,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create stops table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity TEXT NOT NULL,
                price TEXT NOT NULL,
                state TEXT NOT NULL,
                submitted_at INTEGER NOT NULL,
                broker_order_id TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create orders table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_orders_symbol_side_time
            ON orders (symbol, side, submitted_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create orders index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                kind TEXT NOT NULL,
                kind_group TEXT NOT NULL,
                priority INTEGER NOT NULL,
                payload_json TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                enqueued_at INTEGER NOT NULL,
                visible_until INTEGER
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create queue table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_queue_status_priority
            ON queue (status, priority, enqueued_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create queue index")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_queue_symbol_kind_group
            ON queue (symbol, kind_group, status);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create queue dedup index")?;

        info!("database schema initialized");
        Ok(())
    }
}
