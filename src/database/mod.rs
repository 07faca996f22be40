//! Database connection and schema management
//!
//! The pool is acquired once at start-up; failing to connect is fatal for
//! the run. Schema DDL is idempotent and applied before any record is
//! written.

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

use crate::config::{mask_database_url, DatabaseConfig};
use crate::error::EtlError;
use crate::schema::SCHEMA_SQL;

mod property_repository;

pub use property_repository::PropertyRepository;

/// Database connection manager
pub struct DatabaseManager {
    pool: PgPool,
}

impl DatabaseManager {
    /// Connect with the given configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, EtlError> {
        let url = config.database_url();
        let masked = mask_database_url(&url);
        info!("Connecting to database: {}", masked);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(config.connection_timeout)
            .connect(&url)
            .await
            .map_err(|e| {
                warn!("Failed to connect to database: {}", e);
                EtlError::FatalConnection {
                    url: masked.clone(),
                    reason: e.to_string(),
                }
            })?;

        info!("Database connection pool created successfully");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the six property tables if they do not exist
    pub async fn ensure_schema(&self) -> Result<(), EtlError> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| EtlError::Schema(e.to_string()))?;
        info!("Property schema is in place");
        Ok(())
    }

    /// Repository that writes normalized records through this pool
    pub fn property_repository(&self) -> PropertyRepository {
        PropertyRepository::new(self.pool.clone())
    }

    /// Close the pool, waiting for connections to be released
    pub async fn close(self) {
        self.pool.close().await;
    }
}
