use sqlx::{postgres::PgPoolOptions, PgPool};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::database::record::RecordError;
use crate::filter::FilterError;

/// Errors raised by storage backends
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Invalid database name: {0}")]
    InvalidDatabaseName(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Connection pools keyed by database name, created lazily from `DATABASE_URL`
pub struct DatabaseManager {
    pools: Arc<RwLock<HashMap<String, PgPool>>>,
}

impl Default for DatabaseManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseManager {
    fn instance() -> &'static DatabaseManager {
        use std::sync::OnceLock;
        static INSTANCE: OnceLock<DatabaseManager> = OnceLock::new();
        INSTANCE.get_or_init(DatabaseManager::new)
    }

    pub fn new() -> Self {
        Self {
            pools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Pool for the database named in `DATABASE_URL`
    pub async fn default_pool() -> Result<PgPool, DatabaseError> {
        let name = Self::database_name(&Self::database_url()?)?;
        Self::instance().get_pool(&name).await
    }

    fn database_name(database_url: &str) -> Result<String, DatabaseError> {
        let url = url::Url::parse(database_url).map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
        let name = url.path().trim_start_matches('/');
        if !Self::is_valid_db_name(name) {
            return Err(DatabaseError::InvalidDatabaseName(name.to_string()));
        }
        Ok(name.to_string())
    }

    async fn get_pool(&self, database_name: &str) -> Result<PgPool, DatabaseError> {
        // Fast path: try read lock
        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(database_name) {
                return Ok(pool.clone());
            }
        }

        let connection_string = Self::build_connection_string(database_name)?;
        let settings = &crate::config::CONFIG.database;
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.connection_timeout))
            .connect(&connection_string)
            .await?;

        // Another task may have raced us; keep whichever landed first
        let mut pools = self.pools.write().await;
        let pool = pools.entry(database_name.to_string()).or_insert(pool).clone();

        info!("Created database pool for: {}", database_name);
        Ok(pool)
    }

    fn database_url() -> Result<String, DatabaseError> {
        std::env::var("DATABASE_URL").map_err(|_| DatabaseError::ConfigMissing("DATABASE_URL"))
    }

    fn build_connection_string(database_name: &str) -> Result<String, DatabaseError> {
        let base = Self::database_url()?;
        let mut url = url::Url::parse(&base).map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
        url.set_path(&format!("/{}", database_name));
        Ok(url.into())
    }

    /// Pings the default pool to ensure connectivity
    pub async fn health_check() -> Result<(), DatabaseError> {
        let pool = Self::default_pool().await?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(())
    }

    fn is_valid_db_name(name: &str) -> bool {
        !name.is_empty()
            && name.len() <= 63
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}
