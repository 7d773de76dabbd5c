//! Persistence Layer
//!
//! SQLite-backed implementation of the internal catalog store, using sqlx.
//!
//! # Database Schema
//!
//! ## products
//! The internal catalog. Read-only to the ingestion pipeline.
//!
//! ## provider_prices
//! Latest observed price per provider SKU, optionally tied to a product
//! through the match that produced it.
//!
//! ## price_history
//! One row per observed provider price change of a matched product.
//!
//! ## price_comparisons / change_alerts
//! Derived records, pruned after the retention period. Alerts are unique on
//! `alert_key`, so repeated detection runs store each event once.
//!
//! ## dead_letters
//! Records that could not be persisted, kept for manual triage.

pub mod models;
pub mod repository;

pub use repository::SqliteCatalogStore;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::domain::errors::PipelineError;

/// Database connection pool
pub type DbPool = SqlitePool;

/// Database initialization error
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Query error: {0}")]
    QueryError(String),
}

impl From<DatabaseError> for PipelineError {
    fn from(e: DatabaseError) -> Self {
        PipelineError::Persistence(e.to_string())
    }
}

/// Initialize the database connection pool with default settings
///
/// # Arguments
/// - `database_url`: SQLite URL (e.g., "sqlite://data/pricewatch.db" or "sqlite::memory:")
pub async fn init_database(database_url: &str) -> Result<DbPool, DatabaseError> {
    init_database_with(&DatabaseConfig {
        url: database_url.to_string(),
        ..Default::default()
    })
    .await
}

/// Initialize the database connection pool and run migrations
///
/// # Errors
/// Returns error if database connection fails or migrations fail
pub async fn init_database_with(config: &DatabaseConfig) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", config.url);

    // Ensure data directory exists
    if let Some(db_path) = config.url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
                })?;
            }
        }
    }

    let mut options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);
    if !config.log_queries {
        options = options.disable_statement_logging();
    }

    // Every connection to ":memory:" is its own database
    let in_memory = config.url.contains(":memory:");
    let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory {
        1
    } else {
        config.max_connections
    });
    if in_memory {
        pool_options = pool_options.idle_timeout(None).max_lifetime(None);
    }

    let pool = pool_options.connect_with(options).await?;

    run_migrations(&pool).await?;

    info!("✓ Database initialized successfully");

    Ok(pool)
}

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "products",
        r#"
        CREATE TABLE IF NOT EXISTS products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sku TEXT NOT NULL UNIQUE,
            barcode TEXT,
            name TEXT NOT NULL,
            brand TEXT,
            category TEXT NOT NULL,
            unit_price REAL NOT NULL,
            active BOOLEAN NOT NULL DEFAULT 1,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    ),
    (
        "provider_prices",
        r#"
        CREATE TABLE IF NOT EXISTS provider_prices (
            sku TEXT PRIMARY KEY,
            product_id INTEGER,
            name TEXT NOT NULL,
            brand TEXT,
            category TEXT NOT NULL,
            unit_price REAL NOT NULL,
            promo_price REAL,
            stock INTEGER,
            min_stock INTEGER,
            barcode TEXT,
            source TEXT NOT NULL,
            source_url TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            confidence_score INTEGER NOT NULL,
            match_strategy TEXT,
            match_confidence INTEGER,
            observed_at DATETIME NOT NULL,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    ),
    (
        "price_history",
        r#"
        CREATE TABLE IF NOT EXISTS price_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            product_id INTEGER NOT NULL,
            price REAL NOT NULL,
            observed_at DATETIME NOT NULL
        )
        "#,
    ),
    (
        "price_comparisons",
        r#"
        CREATE TABLE IF NOT EXISTS price_comparisons (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            product_id INTEGER NOT NULL,
            current_price REAL NOT NULL,
            provider_price REAL NOT NULL,
            absolute_diff REAL NOT NULL,
            percent_diff REAL NOT NULL,
            source TEXT NOT NULL,
            compared_at DATETIME NOT NULL,
            is_savings_opportunity BOOLEAN NOT NULL,
            recommendation TEXT NOT NULL
                CHECK(recommendation IN ('switch_provider', 'negotiate', 'keep_current')),
            confidence INTEGER NOT NULL CHECK(confidence BETWEEN 0 AND 100)
        )
        "#,
    ),
    (
        "change_alerts",
        r#"
        CREATE TABLE IF NOT EXISTS change_alerts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            product_id INTEGER NOT NULL,
            change_type TEXT NOT NULL CHECK(change_type IN ('increase', 'decrease', 'new_product')),
            previous_value REAL,
            new_value REAL,
            percent_change REAL,
            severity TEXT NOT NULL CHECK(severity IN ('low', 'medium', 'high', 'critical')),
            message TEXT NOT NULL,
            recommended_action TEXT NOT NULL,
            raised_at DATETIME NOT NULL,
            processed BOOLEAN NOT NULL DEFAULT 0,
            alert_key TEXT NOT NULL UNIQUE
        )
        "#,
    ),
    (
        "dead_letters",
        r#"
        CREATE TABLE IF NOT EXISTS dead_letters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sku TEXT,
            payload_json TEXT NOT NULL,
            error TEXT NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at DATETIME NOT NULL
        )
        "#,
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_products_active ON products(active)",
    "CREATE INDEX IF NOT EXISTS idx_products_barcode ON products(barcode)",
    "CREATE INDEX IF NOT EXISTS idx_provider_prices_product ON provider_prices(product_id)",
    "CREATE INDEX IF NOT EXISTS idx_price_history_product_time ON price_history(product_id, observed_at)",
    "CREATE INDEX IF NOT EXISTS idx_comparisons_compared_at ON price_comparisons(compared_at)",
    "CREATE INDEX IF NOT EXISTS idx_alerts_raised_at ON change_alerts(raised_at, processed)",
    "CREATE INDEX IF NOT EXISTS idx_dead_letters_status ON dead_letters(status)",
];

/// Run database migrations
async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    for (table, ddl) in MIGRATIONS {
        sqlx::query(ddl).execute(pool).await.map_err(|e| {
            DatabaseError::MigrationError(format!("Failed to create {} table: {}", table, e))
        })?;
    }

    for ddl in INDEXES {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;
    }

    info!("✓ Database migrations completed successfully");

    Ok(())
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://data/pricewatch.db")
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Enable query logging
    pub log_queries: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/pricewatch.db".to_string(),
            max_connections: 5,
            log_queries: cfg!(debug_assertions),
        }
    }
}

impl DatabaseConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let url = std::env::var("PRICEWATCH_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .unwrap_or(defaults.url);

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_connections);

        let log_queries = std::env::var("DATABASE_LOG_QUERIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.log_queries);

        Self {
            url,
            max_connections,
            log_queries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_init() {
        let pool = init_database("sqlite::memory:").await;
        assert!(pool.is_ok());
    }

    #[tokio::test]
    async fn test_migrations() {
        let pool = init_database("sqlite::memory:").await.unwrap();

        let result: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN \
             ('products', 'provider_prices', 'price_history', 'price_comparisons', 'change_alerts', 'dead_letters')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        assert_eq!(result.0, 6);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        assert!(run_migrations(&pool).await.is_ok());
    }

    #[test]
    fn test_database_config_default() {
        let config = DatabaseConfig::default();
        assert_eq!(config.url, "sqlite://data/pricewatch.db");
        assert_eq!(config.max_connections, 5);
    }

    #[test]
    fn test_database_error_maps_to_persistence() {
        let err: PipelineError = DatabaseError::QueryError("boom".to_string()).into();
        assert_eq!(err.code(), "PERSISTENCE_ERROR");
        assert!(!err.retryable());
    }
}
