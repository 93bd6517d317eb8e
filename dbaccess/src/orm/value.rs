//! Column kinds and bindable SQL values.

use std::fmt;

use chrono::{DateTime, Utc};
use sqlx::Postgres;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use uuid::Uuid;

/// Postgres column types understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Text,
    Int,
    BigInt,
    Float,
    Bool,
    Uuid,
    Timestamp,
    Json,
}

impl ColumnKind {
    /// Postgres type name, as used in DDL and casts.
    pub fn pg_type(&self) -> &'static str {
        match self {
            ColumnKind::Text => "text",
            ColumnKind::Int => "integer",
            ColumnKind::BigInt => "bigint",
            ColumnKind::Float => "double precision",
            ColumnKind::Bool => "boolean",
            ColumnKind::Uuid => "uuid",
            ColumnKind::Timestamp => "timestamptz",
            ColumnKind::Json => "jsonb",
        }
    }

    /// Only text columns take part in translation fallback.
    pub fn is_text(&self) -> bool {
        matches!(self, ColumnKind::Text)
    }
}

/// Rust types that map onto a [`ColumnKind`].
///
/// Implemented for the supported scalar types and for `Option` of each; the
/// entity derive uses it to build column metadata.
pub trait SqlType {
    const KIND: ColumnKind;
    const NULLABLE: bool = false;
}

macro_rules! sql_type {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(impl SqlType for $ty {
            const KIND: ColumnKind = ColumnKind::$kind;
        })*
    };
}

sql_type! {
    String => Text,
    i32 => Int,
    i64 => BigInt,
    f64 => Float,
    bool => Bool,
    Uuid => Uuid,
    DateTime<Utc> => Timestamp,
    serde_json::Value => Json,
}

impl<T: SqlType> SqlType for Option<T> {
    const KIND: ColumnKind = T::KIND;
    const NULLABLE: bool = true;
}

/// A value bound as a statement parameter.
///
/// `Null` carries the column kind so the parameter is sent with the right
/// type OID; an untyped NULL would be rejected by uuid or timestamptz columns.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Int(i32),
    BigInt(i64),
    Float(f64),
    Bool(bool),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
    Null(ColumnKind),
}

impl SqlValue {
    pub fn kind(&self) -> ColumnKind {
        match self {
            SqlValue::Text(_) => ColumnKind::Text,
            SqlValue::Int(_) => ColumnKind::Int,
            SqlValue::BigInt(_) => ColumnKind::BigInt,
            SqlValue::Float(_) => ColumnKind::Float,
            SqlValue::Bool(_) => ColumnKind::Bool,
            SqlValue::Uuid(_) => ColumnKind::Uuid,
            SqlValue::Timestamp(_) => ColumnKind::Timestamp,
            SqlValue::Json(_) => ColumnKind::Json,
            SqlValue::Null(kind) => *kind,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// Bind this value to a sqlx query at the next parameter index.
    pub fn bind_to_query<'q>(
        &'q self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        match self {
            SqlValue::Text(s) => query.bind(s.as_str()),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::BigInt(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Bool(b) => query.bind(*b),
            SqlValue::Uuid(u) => query.bind(*u),
            SqlValue::Timestamp(t) => query.bind(*t),
            SqlValue::Json(v) => query.bind(sqlx::types::Json(v)),
            SqlValue::Null(kind) => match kind {
                ColumnKind::Text => query.bind(None::<String>),
                ColumnKind::Int => query.bind(None::<i32>),
                ColumnKind::BigInt => query.bind(None::<i64>),
                ColumnKind::Float => query.bind(None::<f64>),
                ColumnKind::Bool => query.bind(None::<bool>),
                ColumnKind::Uuid => query.bind(None::<Uuid>),
                ColumnKind::Timestamp => query.bind(None::<DateTime<Utc>>),
                ColumnKind::Json => query.bind(None::<sqlx::types::Json<serde_json::Value>>),
            },
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Text(s) => write!(f, "'{}'", s),
            SqlValue::Int(i) => write!(f, "{}", i),
            SqlValue::BigInt(i) => write!(f, "{}", i),
            SqlValue::Float(v) => write!(f, "{}", v),
            SqlValue::Bool(b) => write!(f, "{}", b),
            SqlValue::Uuid(u) => write!(f, "{}", u),
            SqlValue::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            SqlValue::Json(v) => write!(f, "{}", v),
            SqlValue::Null(_) => write!(f, "NULL"),
        }
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::BigInt(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<Uuid> for SqlValue {
    fn from(value: Uuid) -> Self {
        SqlValue::Uuid(value)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(value)
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(value: serde_json::Value) -> Self {
        SqlValue::Json(value)
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: SqlType + Into<SqlValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => SqlValue::Null(T::KIND),
        }
    }
}
