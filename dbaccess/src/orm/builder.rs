//! SQL query builder
//!
//! Turns an entity descriptor, its joins, filters and request options into
//! parameterized SQL. Only identifiers taken from the registry are written
//! into the SQL text; every caller-supplied value is bound as a parameter.

use once_cell::sync::Lazy;
use uuid::Uuid;

use super::filter::{FilterComparer, GenericFilter};
use super::join::{CrossSource, JoinDefinition};
use super::options::RequestOptions;
use super::params::{BuiltQuery, ParamMap};
use super::registry::{EntityDescriptor, HistoryRef, TableRef};
use super::value::SqlValue;
use crate::error::{DbAccessError, Result};

static DEFAULT_OPTIONS: Lazy<RequestOptions> = Lazy::new(RequestOptions::default);

const LANGUAGE_PARAM: &str = "_language";

/// A SELECT query builder over one entity.
///
/// ```rust,ignore
/// let query = QueryBuilder::new(&role)
///     .joins(&joins)
///     .filters(&filters)
///     .options(&options)
///     .build()?;
/// ```
pub struct QueryBuilder<'a> {
    entity: &'a EntityDescriptor,
    joins: &'a [JoinDefinition],
    cross: Option<&'a CrossSource>,
    filters: &'a [GenericFilter],
    options: &'a RequestOptions,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(entity: &'a EntityDescriptor) -> Self {
        Self {
            entity,
            joins: &[],
            cross: None,
            filters: &[],
            options: &DEFAULT_OPTIONS,
        }
    }

    pub fn joins(mut self, joins: &'a [JoinDefinition]) -> Self {
        self.joins = joins;
        self
    }

    /// Read the entity through a junction table.
    pub fn cross(mut self, cross: &'a CrossSource) -> Self {
        self.cross = Some(cross);
        self
    }

    pub fn filters(mut self, filters: &'a [GenericFilter]) -> Self {
        self.filters = filters;
        self
    }

    pub fn options(mut self, options: &'a RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Build the SELECT statement.
    pub fn build(&self) -> Result<BuiltQuery> {
        self.check_temporal_support()?;

        let mut params = ParamMap::new();
        let alias = &self.entity.base.alias;

        let columns = self.columns();
        let from = self.from_clause(&mut params);
        let conditions = self.conditions(&mut params)?;
        let where_sql = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        let pk = self.entity.primary_key;
        let order_column = match self.order_property() {
            property if property == pk => format!("{alias}.{pk}"),
            // the key breaks ties so separate page requests agree on row order
            property => format!("{alias}.{property}, {alias}.{pk}"),
        };

        let sql = if self.options.use_paging {
            let offset = params.push("_offset", SqlValue::BigInt(self.options.offset()));
            let limit = params.push("_limit", SqlValue::BigInt(self.options.limit()));
            format!(
                "WITH pagedresult AS (SELECT {columns}, ROW_NUMBER() OVER (ORDER BY {order_column}) AS _rownum FROM {from}{where_sql}) \
                 SELECT * FROM pagedresult, (SELECT MAX(pagedresult._rownum) AS _totalitems FROM pagedresult) AS pageinfo \
                 ORDER BY _rownum OFFSET {offset} ROWS FETCH NEXT {limit} ROWS ONLY"
            )
        } else if self.options.order_by.is_some() {
            format!("SELECT {columns} FROM {from}{where_sql} ORDER BY {order_column}")
        } else {
            format!("SELECT {columns} FROM {from}{where_sql}")
        };

        let mut built = BuiltQuery::new(sql, params);
        built.as_of = self.options.as_of;
        Ok(built)
    }

    /// Every recorded version of one row: history rows plus the live row,
    /// oldest first.
    pub fn history(entity: &EntityDescriptor, id: Uuid) -> Result<BuiltQuery> {
        let history = entity.history.as_ref().ok_or_else(|| {
            DbAccessError::InvalidOperation(format!("{} is not audited", entity.name))
        })?;

        let columns = entity.sorted_property_names().join(", ");
        let mut params = ParamMap::new();
        let id_param = params.push("_id", SqlValue::Uuid(id));
        let pk = entity.primary_key;

        let sql = format!(
            "SELECT {columns}, audit_validfrom, audit_validto FROM {} WHERE {pk} = {id_param} \
             UNION ALL \
             SELECT {columns}, audit_validfrom, NULL::timestamptz AS audit_validto FROM {} WHERE {pk} = {id_param} \
             ORDER BY audit_validfrom",
            history.table.qualified(),
            entity.base.qualified(),
        );
        Ok(BuiltQuery::new(sql, params))
    }

    fn language(&self) -> Option<&str> {
        self.options.active_language()
    }

    fn is_temporal(&self) -> bool {
        self.options.as_of.is_some()
    }

    fn check_temporal_support(&self) -> Result<()> {
        if !self.is_temporal() {
            return Ok(());
        }
        let unsupported = std::iter::once(self.entity)
            .chain(self.joins.iter().map(|j| j.entity.as_ref()))
            .chain(self.cross.iter().map(|c| c.junction.as_ref()))
            .find(|e| !e.is_audited());
        match unsupported {
            Some(e) => Err(DbAccessError::InvalidOperation(format!(
                "as-of read requested but {} has no history",
                e.name
            ))),
            None => Ok(()),
        }
    }

    /// Live table, or the history view when reading as of a past instant.
    fn source(&self, table: &TableRef, history: Option<&HistoryRef>) -> String {
        match history {
            Some(h) if self.is_temporal() => h.view.qualified(),
            _ => table.qualified(),
        }
    }

    fn base_source(&self, entity: &EntityDescriptor) -> String {
        self.source(&entity.base, entity.history.as_ref())
    }

    fn translation_source(&self, entity: &EntityDescriptor) -> Option<String> {
        entity
            .translation
            .as_ref()
            .map(|t| self.source(t, entity.translation_history.as_ref()))
    }

    fn uses_translation(&self, entity: &EntityDescriptor) -> bool {
        self.language().is_some() && entity.is_translated()
    }

    /// Column expression for one property, with translation fallback.
    fn column_expr(
        &self,
        entity: &EntityDescriptor,
        table_alias: &str,
        translation_alias: &str,
        property: &str,
    ) -> String {
        let translated = self.uses_translation(entity)
            && entity.translatable().any(|p| p.name == property);
        if translated {
            format!(
                "COALESCE({}.{}, {}.{})",
                translation_alias, property, table_alias, property
            )
        } else {
            format!("{}.{}", table_alias, property)
        }
    }

    fn columns(&self) -> String {
        let entity = self.entity;
        let alias = &entity.base.alias;
        let translation_alias = entity
            .translation
            .as_ref()
            .map(|t| t.alias.as_str())
            .unwrap_or_default();

        let mut columns: Vec<String> = entity
            .properties
            .iter()
            .map(|p| {
                format!(
                    "{} AS {}",
                    self.column_expr(entity, alias, translation_alias, p.name),
                    p.name
                )
            })
            .collect();

        for join in self.joins {
            if join.list {
                columns.push(self.list_column(join));
                continue;
            }
            let sql_alias = join.sql_alias();
            let translation_alias = join.translation_alias();
            let prefix = join.column_prefix();
            for p in &join.entity.properties {
                columns.push(format!(
                    "{} AS {}{}",
                    self.column_expr(&join.entity, &sql_alias, &translation_alias, p.name),
                    prefix,
                    p.name
                ));
            }
        }

        columns.join(", ")
    }

    /// Correlated JSON aggregate; never NULL.
    fn list_column(&self, join: &JoinDefinition) -> String {
        let sql_alias = join.sql_alias();
        let base_alias = &self.entity.base.alias;
        let mut matches = vec![format!(
            "{}.{} = {}.{}",
            sql_alias, join.join_property, base_alias, join.base_property
        )];
        for f in &join.filters {
            matches.push(format!(
                "{}.{} = {}.{}",
                sql_alias, f.join_property, base_alias, f.base_property
            ));
        }
        format!(
            "COALESCE((SELECT JSON_AGG(ROW_TO_JSON({sql_alias})) FROM {} AS {sql_alias} WHERE {}), '[]') AS {}",
            self.base_source(&join.entity),
            matches.join(" AND "),
            join.alias
        )
    }

    fn translation_join(
        &self,
        entity: &EntityDescriptor,
        row_alias: &str,
        translation_alias: &str,
        params: &mut ParamMap,
    ) -> Option<String> {
        if !self.uses_translation(entity) {
            return None;
        }
        let source = self.translation_source(entity)?;
        let language = params.shared(
            LANGUAGE_PARAM,
            SqlValue::Text(self.language().unwrap_or_default().to_string()),
        );
        let pk = entity.primary_key;
        Some(format!(
            " LEFT JOIN LATERAL (SELECT t.* FROM {source} AS t WHERE t.{pk} = {row_alias}.{pk} AND t.language = {language} LIMIT 1) AS {translation_alias} ON TRUE"
        ))
    }

    fn from_clause(&self, params: &mut ParamMap) -> String {
        let entity = self.entity;
        let alias = &entity.base.alias;

        let mut from = match self.cross {
            Some(cross) => {
                let x = CrossSource::ALIAS;
                format!(
                    "{} AS {x} INNER JOIN {} AS {alias} ON {x}.{} = {alias}.{}",
                    self.base_source(&cross.junction),
                    self.base_source(entity),
                    cross.target_column,
                    entity.primary_key
                )
            }
            None => format!("{} AS {}", self.base_source(entity), alias),
        };

        if let Some(translation) = &entity.translation {
            if let Some(lateral) = self.translation_join(entity, alias, &translation.alias, params)
            {
                from.push_str(&lateral);
            }
        }

        for join in self.joins.iter().filter(|j| !j.list) {
            let sql_alias = join.sql_alias();
            let kind = if join.optional {
                "LEFT OUTER JOIN"
            } else {
                "INNER JOIN"
            };
            from.push_str(&format!(
                " {kind} {} AS {sql_alias} ON {alias}.{} = {sql_alias}.{}",
                self.base_source(&join.entity),
                join.base_property,
                join.join_property
            ));
            for f in &join.filters {
                from.push_str(&format!(
                    " AND {alias}.{} = {sql_alias}.{}",
                    f.base_property, f.join_property
                ));
            }
            if let Some(lateral) =
                self.translation_join(&join.entity, &sql_alias, &join.translation_alias(), params)
            {
                from.push_str(&lateral);
            }
        }

        from
    }

    fn conditions(&self, params: &mut ParamMap) -> Result<Vec<String>> {
        let mut conditions = Vec::new();
        if let Some(cross) = self.cross {
            let placeholder = params.push("_id", SqlValue::Uuid(cross.id));
            conditions.push(format!(
                "{}.{} = {}",
                CrossSource::ALIAS,
                cross.filter_column,
                placeholder
            ));
        }
        conditions.extend(filter_conditions(
            self.entity,
            &self.entity.base.alias,
            self.filters,
            params,
        )?);
        Ok(conditions)
    }

    fn order_property(&self) -> &str {
        self.options
            .order_by
            .as_deref()
            .and_then(|o| self.entity.property(o))
            .map(|p| p.name)
            .unwrap_or(self.entity.primary_key)
    }
}

/// Compile filters into AND-able conditions on `alias`.
///
/// Repeated `Equals` filters on one property become `IN (...)` and repeated
/// `NotEqual` filters `NOT IN (...)`; anything else is AND-ed as given.
pub fn filter_conditions(
    entity: &EntityDescriptor,
    alias: &str,
    filters: &[GenericFilter],
    params: &mut ParamMap,
) -> Result<Vec<String>> {
    let mut groups: Vec<(&'static str, Vec<&GenericFilter>)> = Vec::new();
    for filter in filters {
        let property = entity.require_property(&filter.property)?.name;
        match groups.iter_mut().find(|(p, _)| *p == property) {
            Some((_, group)) => group.push(filter),
            None => groups.push((property, vec![filter])),
        }
    }

    let mut conditions = Vec::new();
    for (property, group) in groups {
        let column = format!("{}.{}", alias, property);
        let all_non_null = group.iter().all(|f| !f.value.is_null());
        let same_comparer = |c: FilterComparer| group.iter().all(|f| f.comparer == c);

        if group.len() > 1 && all_non_null && same_comparer(FilterComparer::Equals) {
            let list = in_list(property, &group, params);
            conditions.push(format!("{} IN ({})", column, list));
            continue;
        }
        if group.len() > 1 && all_non_null && same_comparer(FilterComparer::NotEqual) {
            let list = in_list(property, &group, params);
            conditions.push(format!("{} NOT IN ({})", column, list));
            continue;
        }

        for filter in group {
            conditions.push(single_condition(entity, &column, property, filter, params)?);
        }
    }
    Ok(conditions)
}

fn in_list(property: &str, group: &[&GenericFilter], params: &mut ParamMap) -> String {
    group
        .iter()
        .map(|f| params.push(property, f.value.clone()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn single_condition(
    entity: &EntityDescriptor,
    column: &str,
    property: &str,
    filter: &GenericFilter,
    params: &mut ParamMap,
) -> Result<String> {
    if filter.value.is_null() {
        return match filter.comparer {
            FilterComparer::Equals => Ok(format!("{} IS NULL", column)),
            FilterComparer::NotEqual => Ok(format!("{} IS NOT NULL", column)),
            other => Err(DbAccessError::InvalidOperation(format!(
                "{:?} cannot compare {}.{} with NULL",
                other, entity.name, property
            ))),
        };
    }

    if filter.comparer.is_pattern() {
        let SqlValue::Text(text) = &filter.value else {
            return Err(DbAccessError::InvalidOperation(format!(
                "{:?} on {}.{} requires a text value",
                filter.comparer, entity.name, property
            )));
        };
        let placeholder = params.push(property, SqlValue::Text(filter.comparer.pattern(text)));
        return Ok(format!("{} ILIKE {}", column, placeholder));
    }

    let placeholder = params.push(property, filter.value.clone());
    Ok(format!(
        "{} {} {}",
        column,
        filter.comparer.operator(),
        placeholder
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orm::registry::PropertyDescriptor;
    use crate::orm::value::ColumnKind;

    fn role() -> EntityDescriptor {
        let prop = |name, kind| PropertyDescriptor {
            name,
            kind,
            nullable: false,
        };
        EntityDescriptor {
            name: "Role",
            rust_type: "Role",
            base: TableRef {
                schema: "dbo".into(),
                name: "role".into(),
                alias: "Role".into(),
            },
            translation: None,
            history: None,
            translation_history: None,
            primary_key: "id",
            foreign_key: "role_id",
            properties: vec![
                prop("id", ColumnKind::Uuid),
                prop("name", ColumnKind::Text),
                prop("code", ColumnKind::Text),
            ],
        }
    }

    #[test]
    fn test_plain_select() {
        let role = role();
        let built = QueryBuilder::new(&role).build().unwrap();
        assert_eq!(
            built.sql,
            "SELECT Role.id AS id, Role.name AS name, Role.code AS code FROM dbo.role AS Role"
        );
        assert!(built.params.is_empty());
        assert_eq!(built.as_of, None);
    }

    #[test]
    fn test_equals_filter_is_bound() {
        let role = role();
        let filters = vec![GenericFilter::equal("name", "Daglig leder")];
        let built = QueryBuilder::new(&role).filters(&filters).build().unwrap();
        assert!(built.sql.ends_with(" WHERE Role.name = $1"));
        assert_eq!(built.param("name"), Some(&SqlValue::Text("Daglig leder".into())));
    }

    #[test]
    fn test_contains_embeds_wildcard_in_value() {
        let role = role();
        let filters = vec![GenericFilter::new("name", FilterComparer::Contains, "leder")];
        let built = QueryBuilder::new(&role).filters(&filters).build().unwrap();
        assert!(built.sql.ends_with("WHERE Role.name ILIKE $1"));
        assert!(!built.sql.contains('%'));
        assert_eq!(built.param("name"), Some(&SqlValue::Text("%leder%".into())));
    }

    #[test]
    fn test_repeated_equals_becomes_in_list() {
        let role = role();
        let filters = vec![
            GenericFilter::equal("code", "dagl"),
            GenericFilter::equal("code", "lede"),
            GenericFilter::new("code", FilterComparer::NotEqual, SqlValue::Null(ColumnKind::Text)),
        ];
        let built = QueryBuilder::new(&role).filters(&filters).build().unwrap();
        // the NULL check breaks the IN grouping, so each filter stands alone
        assert!(built.sql.contains("Role.code = $1 AND Role.code = $2 AND Role.code IS NOT NULL"));

        let filters = vec![
            GenericFilter::equal("code", "dagl"),
            GenericFilter::equal("code", "lede"),
        ];
        let built = QueryBuilder::new(&role).filters(&filters).build().unwrap();
        assert!(built.sql.ends_with("WHERE Role.code IN ($1, $2)"));
        assert_eq!(built.params.len(), 2);
    }

    #[test]
    fn test_unknown_property_is_rejected() {
        let role = role();
        let filters = vec![GenericFilter::equal("name; DROP TABLE role", "x")];
        let err = QueryBuilder::new(&role).filters(&filters).build().unwrap_err();
        assert!(err.is_query_shape());
    }

    #[test]
    fn test_paging_wrapper() {
        let role = role();
        let options = RequestOptions::new().paged(2, 10).order_by("name");
        let built = QueryBuilder::new(&role).options(&options).build().unwrap();
        assert!(built.sql.starts_with("WITH pagedresult AS (SELECT "));
        assert!(built.sql.contains("ROW_NUMBER() OVER (ORDER BY Role.name, Role.id) AS _rownum"));
        assert!(built.sql.contains("MAX(pagedresult._rownum) AS _totalitems"));
        assert!(built.sql.ends_with("OFFSET $1 ROWS FETCH NEXT $2 ROWS ONLY"));
        assert_eq!(built.param("_offset"), Some(&SqlValue::BigInt(10)));
        assert_eq!(built.param("_limit"), Some(&SqlValue::BigInt(10)));
    }

    #[test]
    fn test_invalid_order_falls_back_to_primary_key() {
        let role = role();
        let options = RequestOptions::new().paged(1, 5).order_by("name desc; --");
        let built = QueryBuilder::new(&role).options(&options).build().unwrap();
        assert!(built.sql.contains("ORDER BY Role.id)"));
    }

    #[test]
    fn test_order_by_non_key_adds_key_tie_breaker() {
        let role = role();
        let options = RequestOptions::new().order_by("code");
        let built = QueryBuilder::new(&role).options(&options).build().unwrap();
        assert!(built.sql.ends_with(" ORDER BY Role.code, Role.id"));

        let options = RequestOptions::new().order_by("id");
        let built = QueryBuilder::new(&role).options(&options).build().unwrap();
        assert!(built.sql.ends_with(" ORDER BY Role.id"));
    }

    #[test]
    fn test_as_of_requires_history() {
        let role = role();
        let options = RequestOptions::new().as_of(chrono::Utc::now());
        let err = QueryBuilder::new(&role).options(&options).build().unwrap_err();
        assert!(matches!(err, DbAccessError::InvalidOperation(_)));
    }

    #[test]
    fn test_language_ignored_without_translation_table() {
        let role = role();
        let options = RequestOptions::new().language("eng");
        let built = QueryBuilder::new(&role).options(&options).build().unwrap();
        assert!(!built.sql.contains("LATERAL"));
        assert!(built.params.is_empty());
    }
}
