use std::path::PathBuf;

use culler_core::traits::{PersistentStore, Record};
use culler_core::{AppError, JsonFileStore};

use crate::config::DatabaseConfig;
use crate::database::Database;
use crate::store::PgStore;

/// The store a binary runs against: a local JSON file, or PostgreSQL when
/// a database is configured.
#[derive(Clone)]
pub enum StateStore {
    File(JsonFileStore),
    Postgres(PgStore),
}

impl StateStore {
    /// Connects to PostgreSQL and runs migrations if `database` is set,
    /// otherwise opens the JSON file at `file`.
    pub async fn open(database: Option<DatabaseConfig>, file: PathBuf) -> Result<Self, AppError> {
        match database {
            Some(config) => {
                let db = Database::connect(&config).await?;
                db.migrate().await?;
                tracing::info!(namespace = %config.namespace, "Using PostgreSQL state store");
                Ok(StateStore::Postgres(db.store(config.namespace)))
            }
            None => {
                tracing::info!(path = %file.display(), "Using JSON file state store");
                Ok(StateStore::File(JsonFileStore::new(file)))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            StateStore::File(store) => format!("file {}", store.path().display()),
            StateStore::Postgres(store) => format!("postgres namespace {}", store.namespace()),
        }
    }
}

impl PersistentStore for StateStore {
    async fn get(&self, keys: &[&str]) -> Result<Record, AppError> {
        match self {
            StateStore::File(store) => store.get(keys).await,
            StateStore::Postgres(store) => store.get(keys).await,
        }
    }

    async fn set(&self, record: Record) -> Result<(), AppError> {
        match self {
            StateStore::File(store) => store.set(record).await,
            StateStore::Postgres(store) => store.set(record).await,
        }
    }

    async fn remove(&self, keys: &[&str]) -> Result<(), AppError> {
        match self {
            StateStore::File(store) => store.remove(keys).await,
            StateStore::Postgres(store) => store.remove(keys).await,
        }
    }
}
