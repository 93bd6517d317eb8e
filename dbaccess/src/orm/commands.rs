//! Write statements generated from entity metadata.
//!
//! Column lists are always sorted alphabetically so the same entity produces
//! byte-identical SQL on every call.

use uuid::Uuid;

use super::builder::filter_conditions;
use super::filter::{GenericFilter, GenericParameter};
use super::params::{BuiltQuery, ParamMap};
use super::registry::{EntityDescriptor, TableRef};
use super::value::SqlValue;
use crate::error::{DbAccessError, Result};

const ID_PARAM: &str = "_id";
const LANGUAGE_PARAM: &str = "_language";

/// Sort `(column, value)` pairs by column and check them against the entity.
fn sorted_values(
    entity: &EntityDescriptor,
    mut values: Vec<(&'static str, SqlValue)>,
) -> Result<Vec<(&'static str, SqlValue)>> {
    for (name, _) in &values {
        entity.require_property(name)?;
    }
    values.sort_by(|a, b| a.0.cmp(b.0));
    Ok(values)
}

fn translation_table(entity: &EntityDescriptor) -> Result<&TableRef> {
    entity.translation.as_ref().ok_or_else(|| {
        DbAccessError::InvalidOperation(format!("{} has no translation table", entity.name))
    })
}

/// Values written to the translation table: the key plus text columns.
fn translation_values(
    entity: &EntityDescriptor,
    values: Vec<(&'static str, SqlValue)>,
) -> Vec<(&'static str, SqlValue)> {
    values
        .into_iter()
        .filter(|(name, _)| {
            *name == entity.primary_key || entity.translatable().any(|p| p.name == *name)
        })
        .collect()
}

fn insert_sql(
    table: &str,
    values: &[(&'static str, SqlValue)],
    params: &mut ParamMap,
) -> String {
    let columns: Vec<&str> = values.iter().map(|(name, _)| *name).collect();
    let placeholders: Vec<String> = values
        .iter()
        .map(|(name, value)| params.push(name, value.clone()))
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", ")
    )
}

/// `ON CONFLICT ... DO UPDATE` that skips rows whose values did not change.
fn conflict_update(table: &TableRef, conflict: &[&str], update: &[&str]) -> String {
    if update.is_empty() {
        return format!(" ON CONFLICT ({}) DO NOTHING", conflict.join(", "));
    }
    let set: Vec<String> = update
        .iter()
        .map(|c| format!("{} = EXCLUDED.{}", c, c))
        .collect();
    let current: Vec<String> = update
        .iter()
        .map(|c| format!("{}.{}", table.name, c))
        .collect();
    let excluded: Vec<String> = update.iter().map(|c| format!("EXCLUDED.{}", c)).collect();
    format!(
        " ON CONFLICT ({}) DO UPDATE SET {} WHERE ({}) IS DISTINCT FROM ({})",
        conflict.join(", "),
        set.join(", "),
        current.join(", "),
        excluded.join(", ")
    )
}

pub fn insert(entity: &EntityDescriptor, values: Vec<(&'static str, SqlValue)>) -> Result<BuiltQuery> {
    let values = sorted_values(entity, values)?;
    let mut params = ParamMap::new();
    let sql = insert_sql(&entity.base.qualified(), &values, &mut params);
    Ok(BuiltQuery::new(sql, params))
}

/// Whole-row update; the primary key is never part of the SET list.
pub fn update(
    entity: &EntityDescriptor,
    id: Uuid,
    values: Vec<(&'static str, SqlValue)>,
) -> Result<BuiltQuery> {
    let values: Vec<_> = sorted_values(entity, values)?
        .into_iter()
        .filter(|(name, _)| *name != entity.primary_key)
        .collect();
    set_where_id(entity, &entity.base.qualified(), id, None, values)
}

/// Update selected columns only.
pub fn update_properties(
    entity: &EntityDescriptor,
    id: Uuid,
    parameters: &[GenericParameter],
) -> Result<BuiltQuery> {
    let mut values = Vec::with_capacity(parameters.len());
    for p in parameters {
        let property = entity.require_property(&p.name)?;
        if property.name == entity.primary_key {
            return Err(DbAccessError::InvalidOperation(format!(
                "cannot update primary key of {}",
                entity.name
            )));
        }
        values.push((property.name, p.value.clone()));
    }
    let values = sorted_values(entity, values)?;
    set_where_id(entity, &entity.base.qualified(), id, None, values)
}

fn set_where_id(
    entity: &EntityDescriptor,
    table: &str,
    id: Uuid,
    language: Option<&str>,
    values: Vec<(&'static str, SqlValue)>,
) -> Result<BuiltQuery> {
    if values.is_empty() {
        return Err(DbAccessError::InvalidOperation(format!(
            "nothing to update on {}",
            entity.name
        )));
    }
    let mut params = ParamMap::new();
    let set: Vec<String> = values
        .iter()
        .map(|(name, value)| format!("{} = {}", name, params.push(name, value.clone())))
        .collect();
    let id_param = params.push(ID_PARAM, SqlValue::Uuid(id));
    let mut sql = format!(
        "UPDATE {} SET {} WHERE {} = {}",
        table,
        set.join(", "),
        entity.primary_key,
        id_param
    );
    if let Some(language) = language {
        let language_param = params.push(LANGUAGE_PARAM, SqlValue::Text(language.to_string()));
        sql.push_str(&format!(" AND language = {}", language_param));
    }
    Ok(BuiltQuery::new(sql, params))
}

pub fn delete(entity: &EntityDescriptor, id: Uuid) -> BuiltQuery {
    let mut params = ParamMap::new();
    let id_param = params.push(ID_PARAM, SqlValue::Uuid(id));
    let sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        entity.base.qualified(),
        entity.primary_key,
        id_param
    );
    BuiltQuery::new(sql, params)
}

/// Delete every row matching all filters. An empty filter list is refused.
pub fn delete_where(entity: &EntityDescriptor, filters: &[GenericFilter]) -> Result<BuiltQuery> {
    if filters.is_empty() {
        return Err(DbAccessError::InvalidOperation(format!(
            "refusing to delete from {} without filters",
            entity.name
        )));
    }
    let mut params = ParamMap::new();
    let conditions = filter_conditions(entity, &entity.base.alias, filters, &mut params)?;
    let sql = format!(
        "DELETE FROM {} WHERE {}",
        entity.base.with_alias(),
        conditions.join(" AND ")
    );
    Ok(BuiltQuery::new(sql, params))
}

/// Insert, or update the row whose `conflict` columns match.
///
/// With no explicit conflict properties the primary key is used.
pub fn upsert(
    entity: &EntityDescriptor,
    values: Vec<(&'static str, SqlValue)>,
    conflict: &[&str],
) -> Result<BuiltQuery> {
    let values = sorted_values(entity, values)?;
    let conflict: Vec<&str> = if conflict.is_empty() {
        vec![entity.primary_key]
    } else {
        conflict
            .iter()
            .map(|c| entity.require_property(c).map(|p| p.name))
            .collect::<Result<_>>()?
    };

    let mut params = ParamMap::new();
    let mut sql = insert_sql(&entity.base.qualified(), &values, &mut params);
    let update: Vec<&str> = values
        .iter()
        .map(|(name, _)| *name)
        .filter(|name| *name != entity.primary_key && !conflict.contains(name))
        .collect();
    sql.push_str(&conflict_update(&entity.base, &conflict, &update));
    Ok(BuiltQuery::new(sql, params))
}

pub fn insert_translation(
    entity: &EntityDescriptor,
    values: Vec<(&'static str, SqlValue)>,
    language: &str,
) -> Result<BuiltQuery> {
    let table = translation_table(entity)?;
    let mut values = translation_values(entity, sorted_values(entity, values)?);
    values.push(("language", SqlValue::Text(language.to_string())));
    values.sort_by(|a, b| a.0.cmp(b.0));

    let mut params = ParamMap::new();
    let sql = insert_sql(&table.qualified(), &values, &mut params);
    Ok(BuiltQuery::new(sql, params))
}

pub fn update_translation(
    entity: &EntityDescriptor,
    id: Uuid,
    values: Vec<(&'static str, SqlValue)>,
    language: &str,
) -> Result<BuiltQuery> {
    let table = translation_table(entity)?;
    let values: Vec<_> = translation_values(entity, sorted_values(entity, values)?)
        .into_iter()
        .filter(|(name, _)| *name != entity.primary_key)
        .collect();
    set_where_id(entity, &table.qualified(), id, Some(language), values)
}

pub fn upsert_translation(
    entity: &EntityDescriptor,
    values: Vec<(&'static str, SqlValue)>,
    language: &str,
) -> Result<BuiltQuery> {
    let table = translation_table(entity)?;
    let mut values = translation_values(entity, sorted_values(entity, values)?);
    values.push(("language", SqlValue::Text(language.to_string())));
    values.sort_by(|a, b| a.0.cmp(b.0));

    let mut params = ParamMap::new();
    let mut sql = insert_sql(&table.qualified(), &values, &mut params);
    let update: Vec<&str> = values
        .iter()
        .map(|(name, _)| *name)
        .filter(|name| *name != entity.primary_key && *name != "language")
        .collect();
    sql.push_str(&conflict_update(
        table,
        &[entity.primary_key, "language"],
        &update,
    ));
    Ok(BuiltQuery::new(sql, params))
}
