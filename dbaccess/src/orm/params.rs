//! Named parameters rendered as positional `$n` placeholders.

use chrono::{DateTime, Utc};
use sqlx::Postgres;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;

use super::value::SqlValue;

/// SQL text plus its parameter map, ready for execution.
///
/// Parameter `i` in `params` is bound to placeholder `$(i + 1)`. Names are
/// kept for diagnostics only.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<(String, SqlValue)>,
    /// Temporal read instant, applied as `app.asof` before execution
    pub as_of: Option<DateTime<Utc>>,
}

impl BuiltQuery {
    pub fn new(sql: impl Into<String>, params: ParamMap) -> Self {
        Self {
            sql: sql.into(),
            params: params.into_inner(),
            as_of: None,
        }
    }

    /// Value bound under `name`, if any.
    pub fn param(&self, name: &str) -> Option<&SqlValue> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Build a sqlx query with every parameter bound in order.
    pub fn query(&self) -> Query<'_, Postgres, PgArguments> {
        let mut query = sqlx::query(&self.sql);
        for (_, value) in &self.params {
            query = value.bind_to_query(query);
        }
        query
    }

    /// `name=value` pairs for log output.
    pub fn describe_params(&self) -> String {
        self.params
            .iter()
            .enumerate()
            .map(|(i, (name, value))| format!("${} {}={}", i + 1, name, value))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Ordered parameter collector.
#[derive(Debug, Clone, Default)]
pub struct ParamMap {
    params: Vec<(String, SqlValue)>,
}

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter and return its placeholder. A name that is already
    /// taken gets a numeric suffix.
    pub fn push(&mut self, name: &str, value: SqlValue) -> String {
        let mut unique = name.to_string();
        let mut n = 1;
        while self.position(&unique).is_some() {
            n += 1;
            unique = format!("{}_{}", name, n);
        }
        self.params.push((unique, value));
        format!("${}", self.params.len())
    }

    /// Return the placeholder of an existing parameter, or add it.
    pub fn shared(&mut self, name: &str, value: SqlValue) -> String {
        match self.position(name) {
            Some(i) => format!("${}", i + 1),
            None => self.push(name, value),
        }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|(n, _)| n == name)
    }

    pub fn into_inner(self) -> Vec<(String, SqlValue)> {
        self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_numbers_sequentially() {
        let mut params = ParamMap::new();
        assert_eq!(params.push("name", "a".into()), "$1");
        assert_eq!(params.push("name", "b".into()), "$2");
        assert_eq!(params.push("code", "c".into()), "$3");

        let built = BuiltQuery::new("SELECT 1", params);
        let names: Vec<&str> = built.params.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["name", "name_2", "code"]);
        assert_eq!(built.param("name_2"), Some(&SqlValue::Text("b".into())));
    }

    #[test]
    fn test_shared_reuses_placeholder() {
        let mut params = ParamMap::new();
        let first = params.shared("_language", "nno".into());
        let second = params.shared("_language", "nno".into());
        assert_eq!(first, second);
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_describe_params() {
        let mut params = ParamMap::new();
        params.push("code", "dagl".into());
        params.push("_limit", SqlValue::BigInt(10));
        let built = BuiltQuery::new("", params);
        assert_eq!(built.describe_params(), "$1 code='dagl', $2 _limit=10");
    }
}
