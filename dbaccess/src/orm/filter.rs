//! Filter model: property/comparer/value triples AND-ed into a WHERE clause.

use super::value::SqlValue;

/// Comparison applied by a [`GenericFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterComparer {
    Equals,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    StartsWith,
    EndsWith,
    Contains,
}

impl FilterComparer {
    /// SQL operator for this comparer.
    pub fn operator(&self) -> &'static str {
        match self {
            FilterComparer::Equals => "=",
            FilterComparer::NotEqual => "<>",
            FilterComparer::GreaterThan => ">",
            FilterComparer::GreaterThanOrEqual => ">=",
            FilterComparer::LessThan => "<",
            FilterComparer::LessThanOrEqual => "<=",
            FilterComparer::StartsWith | FilterComparer::EndsWith | FilterComparer::Contains => {
                "ILIKE"
            }
        }
    }

    pub fn is_pattern(&self) -> bool {
        matches!(
            self,
            FilterComparer::StartsWith | FilterComparer::EndsWith | FilterComparer::Contains
        )
    }

    /// Embed the wildcard in the bound value; the SQL text only ever
    /// contains the placeholder. `%`, `_` and `\` in the value match
    /// literally (backslash is the default ILIKE escape).
    pub fn pattern(&self, value: &str) -> String {
        let literal = escape_like(value);
        match self {
            FilterComparer::StartsWith => format!("{}%", literal),
            FilterComparer::EndsWith => format!("%{}", literal),
            FilterComparer::Contains => format!("%{}%", literal),
            _ => value.to_string(),
        }
    }
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// A single WHERE condition on an entity property.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericFilter {
    pub property: String,
    pub comparer: FilterComparer,
    pub value: SqlValue,
}

impl GenericFilter {
    pub fn new(
        property: impl Into<String>,
        comparer: FilterComparer,
        value: impl Into<SqlValue>,
    ) -> Self {
        Self {
            property: property.into(),
            comparer,
            value: value.into(),
        }
    }

    pub fn equal(property: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::new(property, FilterComparer::Equals, value)
    }
}

/// A column assignment for partial updates.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericParameter {
    pub name: String,
    pub value: SqlValue,
}

impl GenericParameter {
    pub fn new(name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Fluent builder for filter lists.
///
/// ```rust,ignore
/// let filters = FilterBuilder::new()
///     .equal("code", "dagl")
///     .contains("name", "leder")
///     .build();
/// ```
#[derive(Debug, Clone, Default)]
pub struct FilterBuilder {
    filters: Vec<GenericFilter>,
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        mut self,
        property: impl Into<String>,
        comparer: FilterComparer,
        value: impl Into<SqlValue>,
    ) -> Self {
        self.filters.push(GenericFilter::new(property, comparer, value));
        self
    }

    pub fn equal(self, property: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.add(property, FilterComparer::Equals, value)
    }

    pub fn not_equal(self, property: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.add(property, FilterComparer::NotEqual, value)
    }

    pub fn greater_than(self, property: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.add(property, FilterComparer::GreaterThan, value)
    }

    pub fn greater_than_or_equal(
        self,
        property: impl Into<String>,
        value: impl Into<SqlValue>,
    ) -> Self {
        self.add(property, FilterComparer::GreaterThanOrEqual, value)
    }

    pub fn less_than(self, property: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.add(property, FilterComparer::LessThan, value)
    }

    pub fn less_than_or_equal(
        self,
        property: impl Into<String>,
        value: impl Into<SqlValue>,
    ) -> Self {
        self.add(property, FilterComparer::LessThanOrEqual, value)
    }

    pub fn starts_with(self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.add(property, FilterComparer::StartsWith, value.into())
    }

    pub fn ends_with(self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.add(property, FilterComparer::EndsWith, value.into())
    }

    pub fn contains(self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.add(property, FilterComparer::Contains, value.into())
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn build(self) -> Vec<GenericFilter> {
        self.filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_wildcards_live_in_value() {
        assert_eq!(FilterComparer::StartsWith.pattern("dag"), "dag%");
        assert_eq!(FilterComparer::EndsWith.pattern("leder"), "%leder");
        assert_eq!(FilterComparer::Contains.pattern("glig"), "%glig%");
        assert_eq!(FilterComparer::Equals.pattern("x"), "x");
        assert_eq!(FilterComparer::Contains.operator(), "ILIKE");
    }

    #[test]
    fn test_pattern_metacharacters_match_literally() {
        assert_eq!(FilterComparer::Contains.pattern("a_b"), r"%a\_b%");
        assert_eq!(FilterComparer::StartsWith.pattern("100%"), r"100\%%");
        assert_eq!(FilterComparer::EndsWith.pattern(r"dir\x"), r"%dir\\x");
        // equality values are bound as-is
        assert_eq!(FilterComparer::Equals.pattern("a_b"), "a_b");
    }

    #[test]
    fn test_builder_preserves_order() {
        let filters = FilterBuilder::new()
            .equal("code", "dagl")
            .contains("name", "leder")
            .greater_than_or_equal("sort_order", 3)
            .build();

        assert_eq!(filters.len(), 3);
        assert_eq!(filters[0], GenericFilter::equal("code", "dagl"));
        assert_eq!(filters[1].comparer, FilterComparer::Contains);
        assert_eq!(filters[1].value, SqlValue::Text("leder".into()));
        assert_eq!(filters[2].value, SqlValue::Int(3));
    }
}
