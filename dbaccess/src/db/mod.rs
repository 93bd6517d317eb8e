//! Database connection and repository construction

mod executor;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub use executor::QueryExecutor;

use crate::audit::{AuditContext, AuditInstaller, AuditedSession};
use crate::config::Config;
use crate::ingest::{ColumnCache, IngestConfig, IngestService};
use crate::orm::{DbEntity, DefinitionRegistry, ExtendedEntity};
use crate::repository::{BasicRepository, CrossRepository, ExtendedRepository};
use crate::telemetry::QueryHashCache;

/// Database wrapper owning the pool, the entity registry and the
/// statement-shape cache shared by every repository.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    registry: Arc<DefinitionRegistry>,
    shapes: Arc<QueryHashCache>,
    ingest: IngestConfig,
    ingest_columns: Arc<ColumnCache>,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: PgPool, registry: DefinitionRegistry) -> Self {
        Self {
            pool,
            registry: Arc::new(registry),
            shapes: Arc::new(QueryHashCache::default()),
            ingest: IngestConfig::default(),
            ingest_columns: Arc::new(ColumnCache::default()),
        }
    }

    /// Get the maximum connection pool size from environment or default
    fn get_max_connections() -> u32 {
        std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10)
    }

    /// Create a new database connection pool
    pub async fn connect(url: &str, registry: DefinitionRegistry) -> Result<Self> {
        let max_connections = Self::get_max_connections();
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        Ok(Self::new(pool, registry))
    }

    /// Connect using the loaded configuration
    pub async fn from_config(config: &Config, registry: DefinitionRegistry) -> Result<Self> {
        let db = Self::connect(&config.database_url, registry).await?;
        Ok(db
            .with_query_cache_capacity(config.query_cache_capacity)
            .with_ingest_config(IngestConfig {
                batch_size: config.ingest_batch_size,
                failure_policy: config.ingest_failure_policy,
            }))
    }

    /// Create a new database connection pool with retry logic
    /// Retries every `retry_interval` until successful
    pub async fn connect_with_retry(
        url: &str,
        registry: DefinitionRegistry,
        retry_interval: Duration,
    ) -> Self {
        let max_connections = Self::get_max_connections();
        loop {
            match PgPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await
            {
                Ok(pool) => {
                    return Self::new(pool, registry);
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_secs = retry_interval.as_secs(),
                        "Database connection failed, retrying"
                    );
                    tokio::time::sleep(retry_interval).await;
                }
            }
        }
    }

    pub fn with_query_cache_capacity(mut self, capacity: usize) -> Self {
        self.shapes = Arc::new(QueryHashCache::new(capacity));
        self
    }

    pub fn with_ingest_config(mut self, ingest: IngestConfig) -> Self {
        self.ingest = ingest;
        self
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn registry(&self) -> &Arc<DefinitionRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> QueryExecutor {
        QueryExecutor::new(self.pool.clone(), self.shapes.clone())
    }

    /// Get a basic repository for `T`
    pub fn basic<T: DbEntity>(&self) -> crate::Result<BasicRepository<T>> {
        BasicRepository::new(self.registry.clone(), self.executor())
    }

    /// Get an extended repository for `E`; register joins before querying
    pub fn extended<E: ExtendedEntity>(&self) -> crate::Result<ExtendedRepository<E>> {
        ExtendedRepository::new(self.registry.clone(), self.executor())
    }

    /// Get a cross repository over junction `X` linking `A` and `B`
    pub fn cross<X: DbEntity, A: DbEntity, B: DbEntity>(
        &self,
    ) -> crate::Result<CrossRepository<X, A, B>> {
        CrossRepository::new(self.registry.clone(), self.executor())
    }

    /// Get the bulk ingest service
    pub fn ingest(&self) -> IngestService {
        IngestService::new(
            self.registry.clone(),
            self.executor(),
            self.ingest.clone(),
            self.ingest_columns.clone(),
        )
    }

    /// Begin an audited transaction
    pub async fn begin_audited(&self, context: &AuditContext) -> crate::Result<AuditedSession> {
        self.executor().begin_audited(context).await
    }

    /// Get the audit trigger installer
    pub fn audit_installer(&self, context: AuditContext) -> AuditInstaller {
        AuditInstaller::new(self.executor(), context)
    }
}
