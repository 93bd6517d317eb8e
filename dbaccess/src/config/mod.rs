//! Engine configuration management

use std::env;

use anyhow::{Context, Result};

use crate::ingest::IngestFailurePolicy;

/// Schema naming used when resolving entity tables.
///
/// History schemas are derived as `{schema}_history`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaConfig {
    /// Schema holding the base tables
    pub base_schema: String,

    /// Schema holding the parallel translation tables
    pub translation_schema: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            base_schema: "dbo".to_string(),
            translation_schema: "translation".to_string(),
        }
    }
}

/// Engine configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Schema naming
    pub schemas: SchemaConfig,

    /// Rows per progress checkpoint during bulk ingestion
    pub ingest_batch_size: usize,

    /// What to do when a single column cannot be written during ingestion
    pub ingest_failure_policy: IngestFailurePolicy,

    /// Number of distinct statement hashes remembered for query logging
    pub query_cache_capacity: usize,
}

impl SchemaConfig {
    /// Schema naming from `DBACCESS_BASE_SCHEMA` and
    /// `DBACCESS_TRANSLATION_SCHEMA`; needs no database settings.
    pub fn from_env() -> Self {
        Self::from_vars(|name| env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            base_schema: var("DBACCESS_BASE_SCHEMA").unwrap_or(defaults.base_schema),
            translation_schema: var("DBACCESS_TRANSLATION_SCHEMA")
                .unwrap_or(defaults.translation_schema),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = var("DATABASE_URL").context("DATABASE_URL is required")?;

        let ingest_failure_policy = match var("DBACCESS_INGEST_FAILURE_POLICY") {
            Some(value) => value
                .parse()
                .with_context(|| format!("Invalid DBACCESS_INGEST_FAILURE_POLICY: {}", value))?,
            None => IngestFailurePolicy::default(),
        };

        Ok(Self {
            database_url,

            schemas: SchemaConfig::from_vars(&var),

            ingest_batch_size: var("DBACCESS_INGEST_BATCH_SIZE")
                .unwrap_or_else(|| "10000".to_string())
                .parse()
                .context("Invalid DBACCESS_INGEST_BATCH_SIZE")?,

            ingest_failure_policy,

            query_cache_capacity: var("DBACCESS_QUERY_CACHE_CAPACITY")
                .unwrap_or_else(|| "1024".to_string())
                .parse()
                .context("Invalid DBACCESS_QUERY_CACHE_CAPACITY")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(vars(&[("DATABASE_URL", "postgres://localhost/am")])).unwrap();
        assert_eq!(config.schemas, SchemaConfig::default());
        assert_eq!(config.ingest_batch_size, 10000);
        assert_eq!(config.ingest_failure_policy, IngestFailurePolicy::NullColumn);
        assert_eq!(config.query_cache_capacity, 1024);
    }

    #[test]
    fn test_missing_database_url() {
        assert!(Config::from_vars(vars(&[])).is_err());
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let bad_capacity = vars(&[
            ("DATABASE_URL", "postgres://localhost/am"),
            ("DBACCESS_QUERY_CACHE_CAPACITY", "lots"),
        ]);
        let err = Config::from_vars(bad_capacity).unwrap_err();
        assert!(err.to_string().contains("DBACCESS_QUERY_CACHE_CAPACITY"));

        let bad_batch = vars(&[
            ("DATABASE_URL", "postgres://localhost/am"),
            ("DBACCESS_INGEST_BATCH_SIZE", "-1"),
        ]);
        assert!(Config::from_vars(bad_batch).is_err());
    }

    #[test]
    fn test_schema_overrides_without_database_url() {
        let schemas = SchemaConfig::from_vars(vars(&[("DBACCESS_BASE_SCHEMA", "accessmgmt")]));
        assert_eq!(schemas.base_schema, "accessmgmt");
        assert_eq!(schemas.translation_schema, "translation");
    }
}
