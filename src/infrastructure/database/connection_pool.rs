use crate::shared::config::DatabaseConfig;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct ConnectionPool {
    pool: Arc<SqlitePool>,
}

impl ConnectionPool {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        Self::with_options(database_url, 5, 30).await
    }

    pub async fn from_config(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        Self::with_options(&config.url, config.max_connections, config.connection_timeout).await
    }

    async fn with_options(
        database_url: &str,
        max_connections: u32,
        timeout_secs: u64,
    ) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(timeout_secs))
            .connect(database_url)
            .await?;

        info!("Database connected: {}", database_url);

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// 単一接続のメモリDB（接続ごとに別DBになるため1本に固定）
    pub async fn from_memory() -> Result<Self, sqlx::Error> {
        Self::with_options("sqlite::memory:", 1, 30).await
    }

    pub fn get_pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(self.pool.as_ref()).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
