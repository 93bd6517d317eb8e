use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{BasicRepository, EntityReader, page_info};
use crate::db::QueryExecutor;
use crate::error::{DbAccessError, Result};
use crate::orm::{
    DbEntity, DefinitionRegistry, ExtendedEntity, FilterComparer, GenericFilter, Join,
    JoinDefinition, QueryBuilder, QueryResult, RequestOptions,
};

/// Property searched by [`ExtendedRepository::search_extended`].
const SEARCH_PROPERTY: &str = "name";

/// Repository reading a base entity together with its declared joins into
/// the projection `E`.
///
/// Joins are registered once, before the first query:
///
/// ```rust,ignore
/// let roles = db
///     .extended::<RoleExtended>()?
///     .join::<Provider>(Join::scalar("provider", "provider_id", "id").optional())?;
/// let found = roles.search_extended("leder", &RequestOptions::new(), false).await?;
/// ```
pub struct ExtendedRepository<E: ExtendedEntity> {
    basic: BasicRepository<E::Base>,
    registry: Arc<DefinitionRegistry>,
    joins: Vec<JoinDefinition>,
}

impl<E: ExtendedEntity> Clone for ExtendedRepository<E> {
    fn clone(&self) -> Self {
        Self {
            basic: self.basic.clone(),
            registry: self.registry.clone(),
            joins: self.joins.clone(),
        }
    }
}

impl<E: ExtendedEntity> ExtendedRepository<E> {
    pub fn new(registry: Arc<DefinitionRegistry>, executor: QueryExecutor) -> Result<Self> {
        Ok(Self {
            basic: BasicRepository::new(registry.clone(), executor)?,
            registry,
            joins: Vec::new(),
        })
    }

    /// Register a join to `J`. The alias must name a join field of `E` of
    /// the same kind (scalar or list) and may only be registered once.
    pub fn join<J: DbEntity>(mut self, join: Join) -> Result<Self> {
        let invalid = |reason: &str| DbAccessError::InvalidJoin {
            alias: join.alias.to_string(),
            reason: reason.to_string(),
        };

        let declared = if join.list {
            E::LIST_JOINS
        } else {
            E::SCALAR_JOINS
        };
        if !declared.contains(&join.alias) {
            return Err(invalid(if join.list {
                "not a list join field of the projection"
            } else {
                "not a scalar join field of the projection"
            }));
        }
        if self.joins.iter().any(|j| j.alias == join.alias) {
            return Err(invalid("already registered"));
        }

        let target = self.registry.get::<J>()?;
        let definition = JoinDefinition::resolve(self.basic.descriptor(), join, target)?;
        tracing::debug!(
            entity = E::Base::NAME,
            alias = %definition.alias,
            joined = definition.entity.name,
            list = definition.list,
            "Registered join"
        );
        self.joins.push(definition);
        Ok(self)
    }

    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            basic: self.basic.with_cancellation(token),
            registry: self.registry.clone(),
            joins: self.joins.clone(),
        }
    }

    /// The plain repository of the base entity.
    pub fn basic(&self) -> &BasicRepository<E::Base> {
        &self.basic
    }

    pub fn joins(&self) -> &[JoinDefinition] {
        &self.joins
    }

    fn check_complete(&self) -> Result<()> {
        let missing = E::SCALAR_JOINS
            .iter()
            .chain(E::LIST_JOINS)
            .find(|alias| !self.joins.iter().any(|j| j.alias == **alias));
        match missing {
            Some(alias) => Err(DbAccessError::InvalidJoin {
                alias: alias.to_string(),
                reason: "projection field has no registered join".to_string(),
            }),
            None => Ok(()),
        }
    }

    fn materialize(rows: &[PgRow]) -> Result<Vec<E>> {
        rows.iter()
            .map(|row| {
                E::from_row(row).map_err(|source| DbAccessError::Materialize {
                    entity: E::Base::NAME,
                    source,
                })
            })
            .collect()
    }

    /// Filtered read with every registered join.
    pub async fn get_extended(
        &self,
        filters: &[GenericFilter],
        options: &RequestOptions,
    ) -> Result<QueryResult<E>> {
        self.check_complete()?;
        let query = QueryBuilder::new(self.basic.descriptor())
            .joins(&self.joins)
            .filters(filters)
            .options(options)
            .build()?;
        let rows = self.basic.executor().fetch_all(&query).await?;
        let items = Self::materialize(&rows)?;
        Ok(QueryResult {
            page: page_info(self.basic.descriptor().name, &rows, items.len(), options)?,
            items,
        })
    }

    pub async fn get_extended_by_id(
        &self,
        id: Uuid,
        options: &RequestOptions,
    ) -> Result<Option<E>> {
        let filters = [GenericFilter::equal(self.basic.descriptor().primary_key, id)];
        let options = RequestOptions {
            use_paging: false,
            ..options.clone()
        };
        Ok(self
            .get_extended(&filters, &options)
            .await?
            .into_items()
            .into_iter()
            .next())
    }

    /// Case-insensitive search on the `name` property: prefix match when
    /// `starts_with` is set, substring match otherwise.
    pub async fn search_extended(
        &self,
        term: &str,
        options: &RequestOptions,
        starts_with: bool,
    ) -> Result<QueryResult<E>> {
        let comparer = if starts_with {
            FilterComparer::StartsWith
        } else {
            FilterComparer::Contains
        };
        let filters = [GenericFilter::new(SEARCH_PROPERTY, comparer, term)];
        self.get_extended(&filters, options).await
    }
}

#[async_trait]
impl<E: ExtendedEntity> EntityReader for ExtendedRepository<E> {
    type Item = E;

    async fn get(
        &self,
        filters: &[GenericFilter],
        options: &RequestOptions,
    ) -> Result<QueryResult<E>> {
        self.get_extended(filters, options).await
    }

    async fn get_by_id(&self, id: Uuid, options: &RequestOptions) -> Result<Option<E>> {
        self.get_extended_by_id(id, options).await
    }
}
