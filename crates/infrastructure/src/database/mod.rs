pub mod sqlite;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        oid TEXT PRIMARY KEY,
        task_identifier TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        parent TEXT,
        execution_status TEXT NOT NULL,
        waiting_reason TEXT,
        handler_uri TEXT,
        completion_timestamp_ms INTEGER,
        body TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(execution_status, waiting_reason)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_completion ON tasks(completion_timestamp_ms)",
    r#"
    CREATE TABLE IF NOT EXISTS nodes (
        oid TEXT PRIMARY KEY,
        node_identifier TEXT NOT NULL UNIQUE,
        body TEXT NOT NULL
    )
    "#,
];

pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("无效的数据库地址: {url}"))?
            .create_if_missing(true);

        // 内存库每个连接各自独立，只能用单连接
        let in_memory = url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { max_connections })
            .acquire_timeout(Duration::from_secs(30));
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .context("连接数据库失败")?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("执行数据库迁移失败")?;
        }
        info!("数据库迁移完成");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
