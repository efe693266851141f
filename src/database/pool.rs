use crate::config::DatabaseConfig;
use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::info;

const SCHEMA_SQL: &str = include_str!("schema.sql");

#[derive(Clone)]
pub struct DbPool {
    pool: PgPool,
}

impl DbPool {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_max_size)
            .acquire_timeout(Duration::from_secs(config.pool_timeout_seconds))
            .connect(&config.url)
            .await?;

        // Test connection
        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }

    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the embedded DDL. Every statement is idempotent so this is
    /// safe to run on every startup.
    pub async fn migrate(&self, vector_size: usize) -> Result<()> {
        let ddl = SCHEMA_SQL.replace("__VECTOR_SIZE__", &vector_size.to_string());
        for statement in ddl.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Schema bootstrap applied (vector size {})", vector_size);
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
