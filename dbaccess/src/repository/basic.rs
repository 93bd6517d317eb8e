//! Single-entity repository: reads, writes and translations.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::PgRow;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{EntityReader, page_info};
use crate::audit::AuditContext;
use crate::db::QueryExecutor;
use crate::error::{DbAccessError, Result};
use crate::orm::{
    BuiltQuery, DbEntity, DefinitionRegistry, EntityDescriptor, GenericFilter, GenericParameter,
    QueryBuilder, QueryResult, RequestOptions, SqlValue, commands,
};

/// One recorded version of a row.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalRecord<T> {
    pub entity: T,
    pub valid_from: DateTime<Utc>,
    /// `None` for the live row
    pub valid_to: Option<DateTime<Utc>>,
}

/// Generic repository for one entity type.
///
/// Every write takes the [`AuditContext`] of the caller; writes to audited
/// tables run inside an audited transaction.
pub struct BasicRepository<T: DbEntity> {
    descriptor: Arc<EntityDescriptor>,
    executor: QueryExecutor,
    _phantom: PhantomData<T>,
}

impl<T: DbEntity> Clone for BasicRepository<T> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            executor: self.executor.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<T: DbEntity> BasicRepository<T> {
    /// Fails with a configuration error when `T` is not registered.
    pub fn new(registry: Arc<DefinitionRegistry>, executor: QueryExecutor) -> Result<Self> {
        Ok(Self {
            descriptor: registry.get::<T>()?,
            executor,
            _phantom: PhantomData,
        })
    }

    /// Same repository, with every statement bound to `token`.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            executor: self.executor.with_cancellation(token),
            _phantom: PhantomData,
        }
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    pub(crate) fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    fn materialize(rows: &[PgRow]) -> Result<Vec<T>> {
        rows.iter()
            .map(|row| {
                T::from_row(row).map_err(|source| DbAccessError::Materialize {
                    entity: T::NAME,
                    source,
                })
            })
            .collect()
    }

    /// Filtered, optionally paged and translated read.
    pub async fn get(
        &self,
        filters: &[GenericFilter],
        options: &RequestOptions,
    ) -> Result<QueryResult<T>> {
        let query = QueryBuilder::new(&self.descriptor)
            .filters(filters)
            .options(options)
            .build()?;
        let rows = self.executor.fetch_all(&query).await?;
        let items = Self::materialize(&rows)?;
        Ok(QueryResult {
            page: page_info(T::NAME, &rows, items.len(), options)?,
            items,
        })
    }

    /// Every row, unpaged.
    pub async fn get_all(&self, options: &RequestOptions) -> Result<QueryResult<T>> {
        self.get(&[], options).await
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<T>> {
        self.get_by_id_with(id, &RequestOptions::default()).await
    }

    /// Read one row by key, honouring language and as-of.
    pub async fn get_by_id_with(&self, id: Uuid, options: &RequestOptions) -> Result<Option<T>> {
        let filters = [GenericFilter::equal(self.descriptor.primary_key, id)];
        let options = RequestOptions {
            use_paging: false,
            ..options.clone()
        };
        Ok(self.get(&filters, &options).await?.into_items().into_iter().next())
    }

    /// Rows where `property` equals `value`.
    pub async fn get_by(
        &self,
        property: &str,
        value: impl Into<SqlValue>,
        options: &RequestOptions,
    ) -> Result<QueryResult<T>> {
        self.get(&[GenericFilter::equal(property, value)], options)
            .await
    }

    /// Every recorded version of `id`, oldest first.
    pub async fn get_history(&self, id: Uuid) -> Result<Vec<HistoricalRecord<T>>> {
        let query = QueryBuilder::history(&self.descriptor, id)?;
        let rows = self.executor.fetch_all(&query).await?;
        rows.iter()
            .map(|row| {
                let record = || -> std::result::Result<_, sqlx::Error> {
                    Ok(HistoricalRecord {
                        entity: T::from_row(row)?,
                        valid_from: row.try_get("audit_validfrom")?,
                        valid_to: row.try_get("audit_validto")?,
                    })
                };
                record().map_err(|source| DbAccessError::Materialize {
                    entity: T::NAME,
                    source,
                })
            })
            .collect()
    }

    async fn write(&self, query: BuiltQuery, context: &AuditContext) -> Result<u64> {
        let affected = self
            .executor
            .execute(&query, self.descriptor.is_audited(), context)
            .await?;
        tracing::debug!(entity = T::NAME, rows = affected, "Write completed");
        Ok(affected)
    }

    pub async fn create(&self, entity: &T, context: &AuditContext) -> Result<u64> {
        let query = commands::insert(&self.descriptor, entity.values())?;
        self.write(query, context).await
    }

    /// Overwrite every column of row `id` with the values of `entity`.
    pub async fn update(&self, id: Uuid, entity: &T, context: &AuditContext) -> Result<u64> {
        let query = commands::update(&self.descriptor, id, entity.values())?;
        self.write(query, context).await
    }

    /// Update only the given columns of row `id`.
    pub async fn update_properties(
        &self,
        id: Uuid,
        parameters: &[GenericParameter],
        context: &AuditContext,
    ) -> Result<u64> {
        let query = commands::update_properties(&self.descriptor, id, parameters)?;
        self.write(query, context).await
    }

    /// Update a single column of row `id`.
    pub async fn update_property(
        &self,
        id: Uuid,
        property: &str,
        value: impl Into<SqlValue>,
        context: &AuditContext,
    ) -> Result<u64> {
        self.update_properties(id, &[GenericParameter::new(property, value)], context)
            .await
    }

    /// Insert or update by primary key.
    pub async fn upsert(&self, entity: &T, context: &AuditContext) -> Result<u64> {
        let query = commands::upsert(&self.descriptor, entity.values(), &[])?;
        self.write(query, context).await
    }

    /// Insert or update on a unique set of properties.
    pub async fn upsert_on(
        &self,
        entity: &T,
        conflict_properties: &[&str],
        context: &AuditContext,
    ) -> Result<u64> {
        let query = commands::upsert(&self.descriptor, entity.values(), conflict_properties)?;
        self.write(query, context).await
    }

    pub async fn delete(&self, id: Uuid, context: &AuditContext) -> Result<u64> {
        self.write(commands::delete(&self.descriptor, id), context)
            .await
    }

    /// Delete every row matching all filters.
    pub async fn delete_where(
        &self,
        filters: &[GenericFilter],
        context: &AuditContext,
    ) -> Result<u64> {
        let query = commands::delete_where(&self.descriptor, filters)?;
        self.write(query, context).await
    }

    pub async fn create_translation(
        &self,
        entity: &T,
        language: &str,
        context: &AuditContext,
    ) -> Result<u64> {
        let query = commands::insert_translation(&self.descriptor, entity.values(), language)?;
        self.write(query, context).await
    }

    pub async fn update_translation(
        &self,
        id: Uuid,
        entity: &T,
        language: &str,
        context: &AuditContext,
    ) -> Result<u64> {
        let query =
            commands::update_translation(&self.descriptor, id, entity.values(), language)?;
        self.write(query, context).await
    }

    pub async fn upsert_translation(
        &self,
        entity: &T,
        language: &str,
        context: &AuditContext,
    ) -> Result<u64> {
        let query = commands::upsert_translation(&self.descriptor, entity.values(), language)?;
        self.write(query, context).await
    }
}

#[async_trait]
impl<T: DbEntity> EntityReader for BasicRepository<T> {
    type Item = T;

    async fn get(
        &self,
        filters: &[GenericFilter],
        options: &RequestOptions,
    ) -> Result<QueryResult<T>> {
        BasicRepository::get(self, filters, options).await
    }

    async fn get_by_id(&self, id: Uuid, options: &RequestOptions) -> Result<Option<T>> {
        self.get_by_id_with(id, options).await
    }
}
