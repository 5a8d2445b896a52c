use culler_core::AppError;
use culler_core::traits::{PersistentStore, Record};
use sqlx::PgPool;

/// [`PersistentStore`] over the `culler_state` table.
///
/// Each logical key is one JSONB row. A `set` upserts all of its keys in
/// one transaction, so a partially written record is never observed.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    namespace: String,
}

impl PgStore {
    pub fn new(pool: PgPool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl PersistentStore for PgStore {
    async fn get(&self, keys: &[&str]) -> Result<Record, AppError> {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let rows: Vec<(String, serde_json::Value)> = sqlx::query_as(
            "SELECT key, value FROM culler_state WHERE namespace = $1 AND key = ANY($2)",
        )
        .bind(&self.namespace)
        .bind(&keys)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(rows.into_iter().collect())
    }

    async fn set(&self, record: Record) -> Result<(), AppError> {
        if record.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        for (key, value) in record {
            sqlx::query(
                "INSERT INTO culler_state (namespace, key, value, updated_at)
                 VALUES ($1, $2, $3, NOW())
                 ON CONFLICT (namespace, key)
                 DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()",
            )
            .bind(&self.namespace)
            .bind(&key)
            .bind(&value)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        }
        tx.commit().await.map_err(store_error)?;
        tracing::trace!(namespace = %self.namespace, "State written");
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<(), AppError> {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        sqlx::query("DELETE FROM culler_state WHERE namespace = $1 AND key = ANY($2)")
            .bind(&self.namespace)
            .bind(&keys)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}

fn store_error(e: sqlx::Error) -> AppError {
    AppError::StoreError(e.to_string())
}
