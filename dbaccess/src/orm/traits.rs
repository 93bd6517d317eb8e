//! Core traits for entity declarations
//!
//! These traits are implemented by the `#[derive(DbEntity)]` and
//! `#[derive(DbExtended)]` macros from `dbaccess-macros`.

use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use super::value::{ColumnKind, SqlValue};

/// Column definition derived from an entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name in the database
    pub name: &'static str,
    /// Postgres column kind
    pub kind: ColumnKind,
    /// Whether the column can be NULL
    pub nullable: bool,
    /// Whether this is the primary key
    pub is_primary_key: bool,
}

impl ColumnDef {
    /// Generate the column definition SQL
    pub fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.kind.pg_type());

        if self.is_primary_key {
            sql.push_str(" PRIMARY KEY");
        }

        if !self.nullable && !self.is_primary_key {
            sql.push_str(" NOT NULL");
        }

        sql
    }
}

/// Metadata and row mapping for a table-backed entity.
///
/// Implemented by `#[derive(DbEntity)]`.
pub trait DbEntity: Sized + Send + Sync + Unpin + 'static {
    /// Type name, used as the table alias in generated SQL (e.g. "Role")
    const NAME: &'static str;

    /// The SQL table name (e.g. "role")
    const TABLE: &'static str;

    /// Schema override; `None` uses the configured base schema
    const SCHEMA: Option<&'static str> = None;

    /// The primary key column name
    const PRIMARY_KEY: &'static str;

    /// Default column name used by junction tables referencing this entity
    const FOREIGN_KEY: &'static str;

    /// Whether a parallel translation table exists
    const TRANSLATED: bool = false;

    /// Whether audit triggers and history tables exist
    const AUDITED: bool = false;

    /// All columns, in declaration order
    fn columns() -> &'static [ColumnDef];

    /// Primary key value
    fn id(&self) -> Uuid;

    /// Column values, in declaration order
    fn values(&self) -> Vec<(&'static str, SqlValue)>;

    /// Decode a row whose columns are named `{prefix}{column}`.
    fn from_row_prefixed(row: &PgRow, prefix: &str) -> Result<Self, sqlx::Error>;

    /// Decode one element of a list join: a JSON object keyed by column
    /// name, as produced by `ROW_TO_JSON`.
    fn from_json(object: &serde_json::Map<String, serde_json::Value>) -> Result<Self, sqlx::Error>;

    /// Decode a row with unprefixed column names.
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Self::from_row_prefixed(row, "")
    }

    /// Decode an optionally joined row; a NULL key means there was no match.
    fn try_from_row_prefixed(row: &PgRow, prefix: &str) -> Result<Option<Self>, sqlx::Error> {
        let key = format!("{}{}", prefix, Self::PRIMARY_KEY);
        let id: Option<Uuid> = row.try_get(key.as_str())?;
        match id {
            Some(_) => Self::from_row_prefixed(row, prefix).map(Some),
            None => Ok(None),
        }
    }
}

/// A denormalized projection of a base entity plus its declared joins.
///
/// Implemented by `#[derive(DbExtended)]`. Every join registered on an
/// extended repository must use one of the declared field names as its
/// alias so the projection can find its columns.
pub trait ExtendedEntity: Sized + Send + Sync + Unpin + 'static {
    type Base: DbEntity;

    /// Field names of the scalar joins
    const SCALAR_JOINS: &'static [&'static str];

    /// Field names of the list joins
    const LIST_JOINS: &'static [&'static str];

    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error>;
}

/// Decode the JSON array produced for a list join.
pub fn decode_list<T: DbEntity>(row: &PgRow, column: &str) -> Result<Vec<T>, sqlx::Error> {
    let decode_error = |message: String| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: message.into(),
    };
    let value: Option<serde_json::Value> = row.try_get(column)?;
    match value {
        None => Ok(Vec::new()),
        Some(serde_json::Value::Array(elements)) => elements
            .iter()
            .map(|element| match element {
                serde_json::Value::Object(object) => T::from_json(object),
                other => Err(decode_error(format!("expected a {} object, got {}", T::NAME, other))),
            })
            .collect(),
        Some(other) => Err(decode_error(format!("expected a JSON array, got {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_def_sql() {
        let pk = ColumnDef {
            name: "id",
            kind: ColumnKind::Uuid,
            nullable: false,
            is_primary_key: true,
        };
        assert_eq!(pk.to_sql(), "id uuid PRIMARY KEY");

        let name = ColumnDef {
            name: "name",
            kind: ColumnKind::Text,
            nullable: false,
            is_primary_key: false,
        };
        assert_eq!(name.to_sql(), "name text NOT NULL");

        let description = ColumnDef {
            nullable: true,
            name: "description",
            ..name
        };
        assert_eq!(description.to_sql(), "description text");
    }
}
