use culler_core::AppError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::DatabaseConfig;
use crate::store::PgStore;

/// Owns the connection pool, runs migrations and vends stores.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::StoreError(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::StoreError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// A [`PgStore`] scoped to `namespace`.
    pub fn store(&self, namespace: impl Into<String>) -> PgStore {
        PgStore::new(self.pool.clone(), namespace)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
