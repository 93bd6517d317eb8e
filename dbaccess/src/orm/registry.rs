//! Entity definition registry
//!
//! Maps each registered entity type to its table descriptors. Built once at
//! startup from `DbEntity` implementations, then shared read-only behind an
//! `Arc`.

use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use super::traits::{ColumnDef, DbEntity};
use super::value::ColumnKind;
use crate::config::SchemaConfig;
use crate::error::{DbAccessError, Result};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid identifier regex"));

/// Reject anything that is not a plain, unquoted SQL identifier.
pub fn validate_identifier(name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(DbAccessError::InvalidIdentifier(name.to_string()))
    }
}

/// A schema-qualified table with the alias used in generated SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
    pub alias: String,
}

impl TableRef {
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// `schema.name AS alias`
    pub fn with_alias(&self) -> String {
        format!("{}.{} AS {}", self.schema, self.name, self.alias)
    }
}

/// History storage of an audited table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRef {
    /// Table the update/delete triggers copy pre-images into
    pub table: TableRef,
    /// View resolving rows valid at `app.asof`
    pub view: TableRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub nullable: bool,
}

impl From<&ColumnDef> for PropertyDescriptor {
    fn from(c: &ColumnDef) -> Self {
        Self {
            name: c.name,
            kind: c.kind,
            nullable: c.nullable,
        }
    }
}

/// Everything the query builder needs to know about one entity.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub name: &'static str,
    pub rust_type: &'static str,
    pub base: TableRef,
    pub translation: Option<TableRef>,
    pub history: Option<HistoryRef>,
    pub translation_history: Option<HistoryRef>,
    pub primary_key: &'static str,
    pub foreign_key: &'static str,
    pub properties: Vec<PropertyDescriptor>,
}

impl EntityDescriptor {
    fn describe<T: DbEntity>(schemas: &SchemaConfig) -> Result<Self> {
        let schema = T::SCHEMA.unwrap_or(schemas.base_schema.as_str()).to_string();
        validate_identifier(&schema)?;
        validate_identifier(T::TABLE)?;
        validate_identifier(T::NAME)?;

        let properties: Vec<PropertyDescriptor> =
            T::columns().iter().map(PropertyDescriptor::from).collect();
        for p in &properties {
            validate_identifier(p.name)?;
        }
        if !properties.iter().any(|p| p.name == T::PRIMARY_KEY) {
            return Err(DbAccessError::unknown_property(T::NAME, T::PRIMARY_KEY));
        }

        let base = TableRef {
            schema: schema.clone(),
            name: T::TABLE.to_string(),
            alias: T::NAME.to_string(),
        };

        let translation = T::TRANSLATED.then(|| TableRef {
            schema: schemas.translation_schema.clone(),
            name: T::TABLE.to_string(),
            alias: format!("T_{}", T::NAME),
        });

        let history_for = |schema: &str| HistoryRef {
            table: TableRef {
                schema: format!("{}_history", schema),
                name: format!("audit_{}", T::TABLE),
                alias: T::NAME.to_string(),
            },
            view: TableRef {
                schema: format!("{}_history", schema),
                name: T::TABLE.to_string(),
                alias: T::NAME.to_string(),
            },
        };

        let history = T::AUDITED.then(|| history_for(&schema));
        let translation_history = (T::AUDITED && T::TRANSLATED)
            .then(|| history_for(&schemas.translation_schema));

        Ok(Self {
            name: T::NAME,
            rust_type: type_name::<T>(),
            base,
            translation,
            history,
            translation_history,
            primary_key: T::PRIMARY_KEY,
            foreign_key: T::FOREIGN_KEY,
            properties,
        })
    }

    pub fn is_translated(&self) -> bool {
        self.translation.is_some()
    }

    pub fn is_audited(&self) -> bool {
        self.history.is_some()
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Look up a property or fail with a query-shape error.
    pub fn require_property(&self, name: &str) -> Result<&PropertyDescriptor> {
        self.property(name)
            .ok_or_else(|| DbAccessError::unknown_property(self.name, name))
    }

    /// Text properties that may have translated values.
    pub fn translatable(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties
            .iter()
            .filter(|p| p.kind.is_text() && p.name != self.primary_key)
    }

    /// Property names in alphabetical order, for deterministic statements.
    pub fn sorted_property_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.properties.iter().map(|p| p.name).collect();
        names.sort_unstable();
        names
    }
}

/// Immutable lookup table from entity type to descriptor.
#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    by_type: HashMap<TypeId, Arc<EntityDescriptor>>,
}

impl DefinitionRegistry {
    pub fn builder(schemas: &SchemaConfig) -> RegistryBuilder {
        RegistryBuilder {
            schemas: schemas.clone(),
            by_type: HashMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn get<T: DbEntity>(&self) -> Result<Arc<EntityDescriptor>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or(DbAccessError::MissingDefinition(T::NAME))
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<EntityDescriptor>> {
        self.by_type
            .values()
            .find(|d| d.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// All descriptors, sorted by entity name.
    pub fn descriptors(&self) -> Vec<Arc<EntityDescriptor>> {
        let mut all: Vec<_> = self.by_type.values().cloned().collect();
        all.sort_by_key(|d| d.name);
        all
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

/// Collects entity registrations; the first invalid declaration fails `build`.
pub struct RegistryBuilder {
    schemas: SchemaConfig,
    by_type: HashMap<TypeId, Arc<EntityDescriptor>>,
    errors: Vec<DbAccessError>,
}

impl RegistryBuilder {
    pub fn register<T: DbEntity>(mut self) -> Self {
        match EntityDescriptor::describe::<T>(&self.schemas) {
            Ok(descriptor) => {
                tracing::debug!(
                    entity = descriptor.name,
                    table = %descriptor.base.qualified(),
                    translated = descriptor.is_translated(),
                    audited = descriptor.is_audited(),
                    "Registered entity definition"
                );
                self.by_type.insert(TypeId::of::<T>(), Arc::new(descriptor));
            }
            Err(e) => self.errors.push(e),
        }
        self
    }

    pub fn build(mut self) -> Result<DefinitionRegistry> {
        if !self.errors.is_empty() {
            return Err(self.errors.remove(0));
        }
        validate_identifier(&self.schemas.base_schema)?;
        validate_identifier(&self.schemas.translation_schema)?;
        Ok(DefinitionRegistry {
            by_type: self.by_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("role").is_ok());
        assert!(validate_identifier("T_Role").is_ok());
        assert!(validate_identifier("_rownum").is_ok());
        assert!(validate_identifier("role; drop table x").is_err());
        assert!(validate_identifier("1role").is_err());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("\"quoted\"").is_err());
    }

    #[test]
    fn test_table_ref_rendering() {
        let t = TableRef {
            schema: "dbo".into(),
            name: "role".into(),
            alias: "Role".into(),
        };
        assert_eq!(t.qualified(), "dbo.role");
        assert_eq!(t.with_alias(), "dbo.role AS Role");
    }

    #[test]
    fn test_empty_registry_reports_missing() {
        let registry = DefinitionRegistry::builder(&SchemaConfig::default())
            .build()
            .unwrap();
        assert!(registry.is_empty());
        assert!(registry.find_by_name("Role").is_none());
    }
}
