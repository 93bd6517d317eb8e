//! Join declarations for extended and cross repositories.

use std::sync::Arc;

use uuid::Uuid;

use super::registry::EntityDescriptor;
use crate::error::{DbAccessError, Result};

/// Separates a scalar join's alias from the joined column name
/// (`provider__name`), so joined columns never read as base foreign keys.
pub const JOIN_COLUMN_SEPARATOR: &str = "__";

/// Extra column equality between the base row and the joined row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinFilter {
    pub base_property: &'static str,
    pub join_property: &'static str,
}

/// Declarative join, written as a struct literal or with the helpers below.
///
/// ```rust,ignore
/// let provider = Join {
///     alias: "provider",
///     base_property: "provider_id",
///     join_property: "id",
///     optional: true,
///     ..Join::default()
/// };
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Join {
    /// Name of the projection field receiving the joined data
    pub alias: &'static str,
    pub base_property: &'static str,
    pub join_property: &'static str,
    /// LEFT OUTER instead of INNER
    pub optional: bool,
    /// Aggregate all matches into a JSON array
    pub list: bool,
    pub filters: Vec<JoinFilter>,
}

impl Join {
    pub fn scalar(
        alias: &'static str,
        base_property: &'static str,
        join_property: &'static str,
    ) -> Self {
        Self {
            alias,
            base_property,
            join_property,
            ..Self::default()
        }
    }

    pub fn list(
        alias: &'static str,
        base_property: &'static str,
        join_property: &'static str,
    ) -> Self {
        Self {
            list: true,
            ..Self::scalar(alias, base_property, join_property)
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn filter(mut self, base_property: &'static str, join_property: &'static str) -> Self {
        self.filters.push(JoinFilter {
            base_property,
            join_property,
        });
        self
    }
}

/// A join checked against the registry.
#[derive(Debug, Clone)]
pub struct JoinDefinition {
    pub alias: String,
    pub base_property: String,
    pub entity: Arc<EntityDescriptor>,
    pub join_property: String,
    pub optional: bool,
    pub list: bool,
    pub filters: Vec<JoinFilter>,
}

impl JoinDefinition {
    pub fn resolve(
        base: &EntityDescriptor,
        join: Join,
        target: Arc<EntityDescriptor>,
    ) -> Result<Self> {
        let invalid = |reason: String| DbAccessError::InvalidJoin {
            alias: join.alias.to_string(),
            reason,
        };

        super::registry::validate_identifier(join.alias)
            .map_err(|_| invalid("alias is not a plain identifier".to_string()))?;
        if join.alias.eq_ignore_ascii_case(base.name) {
            return Err(invalid(format!("alias clashes with base entity {}", base.name)));
        }
        if base.property(join.base_property).is_none() {
            return Err(invalid(format!(
                "{} has no property '{}'",
                base.name, join.base_property
            )));
        }
        if target.property(join.join_property).is_none() {
            return Err(invalid(format!(
                "{} has no property '{}'",
                target.name, join.join_property
            )));
        }
        let prefix = format!("{}{}", join.alias, JOIN_COLUMN_SEPARATOR);
        if let Some(p) = base.properties.iter().find(|p| {
            p.name.starts_with(&prefix) || (join.list && p.name == join.alias)
        }) {
            return Err(invalid(format!(
                "joined columns would shadow {}.{}",
                base.name, p.name
            )));
        }
        for f in &join.filters {
            if base.property(f.base_property).is_none() || target.property(f.join_property).is_none()
            {
                return Err(invalid(format!(
                    "filter {} = {} does not match the joined entities",
                    f.base_property, f.join_property
                )));
            }
        }

        Ok(Self {
            alias: join.alias.to_string(),
            base_property: join.base_property.to_string(),
            entity: target,
            join_property: join.join_property.to_string(),
            optional: join.optional,
            list: join.list,
            filters: join.filters,
        })
    }

    /// Table alias used for the joined rows.
    pub fn sql_alias(&self) -> String {
        format!("_{}", self.alias)
    }

    /// Prefix of the result columns carrying a scalar join's properties.
    pub fn column_prefix(&self) -> String {
        format!("{}{}", self.alias, JOIN_COLUMN_SEPARATOR)
    }

    /// Table alias used for the joined rows' translations.
    pub fn translation_alias(&self) -> String {
        format!("T_{}", self.alias)
    }
}

/// Junction-table source for cross queries: rows of the target entity
/// linked to `id` through the junction.
#[derive(Debug, Clone)]
pub struct CrossSource {
    pub junction: Arc<EntityDescriptor>,
    /// Junction column referencing the target entity
    pub target_column: String,
    /// Junction column compared with `id`
    pub filter_column: String,
    pub id: Uuid,
}

impl CrossSource {
    pub const ALIAS: &'static str = "X";
}
