//! Error taxonomy for the repository engine.
//!
//! Configuration errors are raised while wiring repositories and are never
//! worth retrying. Query-shape errors reject a request before any SQL is
//! sent. Execution errors carry the failing statement so callers can log or
//! classify them (for example unique violations).

use thiserror::Error;

/// Library-local result type.
pub type Result<T> = std::result::Result<T, DbAccessError>;

/// Errors produced by the registry, the query builder, the repositories and
/// the ingest pipeline.
#[derive(Debug, Error)]
pub enum DbAccessError {
    /// No definition registered for the requested entity type.
    #[error("no entity definition registered for {0}")]
    MissingDefinition(&'static str),

    /// A join declaration does not match the registered metadata.
    #[error("invalid join '{alias}': {reason}")]
    InvalidJoin { alias: String, reason: String },

    /// A schema, table or column name is not a plain SQL identifier.
    #[error("invalid SQL identifier: {0}")]
    InvalidIdentifier(String),

    /// A filter, order or parameter refers to a property the entity does not have.
    #[error("unknown property '{property}' on {entity}")]
    UnknownProperty { entity: String, property: String },

    /// The request cannot be expressed against this entity.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The driver rejected or failed the statement.
    #[error("query execution failed: {source}")]
    Execution {
        sql: String,
        #[source]
        source: sqlx::Error,
    },

    /// A row could not be materialized into the target type.
    #[error("failed to materialize {entity}: {source}")]
    Materialize {
        entity: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// A value could not be converted for the binary copy stream.
    #[error("cannot write {value} into column {column} ({pg_type})")]
    Conversion {
        column: String,
        pg_type: String,
        value: String,
    },

    /// Bulk ingestion failed.
    #[error("ingest into {table} failed: {reason}")]
    Ingest { table: String, reason: String },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl DbAccessError {
    pub(crate) fn execution(sql: impl Into<String>, source: sqlx::Error) -> Self {
        DbAccessError::Execution {
            sql: sql.into(),
            source,
        }
    }

    pub(crate) fn unknown_property(entity: &str, property: &str) -> Self {
        DbAccessError::UnknownProperty {
            entity: entity.to_string(),
            property: property.to_string(),
        }
    }

    /// Postgres SQLSTATE of the underlying driver error, if any.
    pub fn sql_state(&self) -> Option<String> {
        match self {
            DbAccessError::Execution {
                source: sqlx::Error::Database(db),
                ..
            } => db.code().map(|c| c.into_owned()),
            _ => None,
        }
    }

    /// True for `23505 unique_violation`, which callers usually treat as
    /// "already exists".
    pub fn is_unique_violation(&self) -> bool {
        self.sql_state().as_deref() == Some("23505")
    }

    /// Configuration errors are raised while wiring repositories.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DbAccessError::MissingDefinition(_)
                | DbAccessError::InvalidJoin { .. }
                | DbAccessError::InvalidIdentifier(_)
        )
    }

    /// Query-shape errors reject a request before it reaches the database.
    pub fn is_query_shape(&self) -> bool {
        matches!(
            self,
            DbAccessError::UnknownProperty { .. } | DbAccessError::InvalidOperation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(DbAccessError::MissingDefinition("Role").is_configuration());
        assert!(DbAccessError::unknown_property("Role", "nope").is_query_shape());
        assert!(!DbAccessError::Cancelled.is_configuration());
        assert!(!DbAccessError::Cancelled.is_unique_violation());
    }

    #[test]
    fn test_messages() {
        let err = DbAccessError::unknown_property("Role", "colour");
        assert_eq!(err.to_string(), "unknown property 'colour' on Role");

        let err = DbAccessError::execution("SELECT 1", sqlx::Error::RowNotFound);
        assert_eq!(err.sql_state(), None);
        assert!(err.to_string().starts_with("query execution failed"));
    }
}
