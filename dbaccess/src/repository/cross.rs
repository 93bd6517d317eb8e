use std::marker::PhantomData;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::page_info;
use crate::audit::AuditContext;
use crate::db::QueryExecutor;
use crate::error::{DbAccessError, Result};
use crate::orm::{
    CrossSource, DbEntity, DefinitionRegistry, EntityDescriptor, GenericFilter, QueryBuilder,
    QueryResult, RequestOptions, SqlValue, commands,
};

/// Many-to-many access to `A` and `B` through the junction entity `X`.
///
/// The junction columns default to `A::FOREIGN_KEY` and `B::FOREIGN_KEY`
/// (`role_id`, `package_id`, ...).
pub struct CrossRepository<X: DbEntity, A: DbEntity, B: DbEntity> {
    junction: Arc<EntityDescriptor>,
    a: Arc<EntityDescriptor>,
    b: Arc<EntityDescriptor>,
    column_a: &'static str,
    column_b: &'static str,
    executor: QueryExecutor,
    _phantom: PhantomData<(X, A, B)>,
}

impl<X: DbEntity, A: DbEntity, B: DbEntity> Clone for CrossRepository<X, A, B> {
    fn clone(&self) -> Self {
        Self {
            junction: self.junction.clone(),
            a: self.a.clone(),
            b: self.b.clone(),
            column_a: self.column_a,
            column_b: self.column_b,
            executor: self.executor.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<X: DbEntity, A: DbEntity, B: DbEntity> CrossRepository<X, A, B> {
    pub fn new(registry: Arc<DefinitionRegistry>, executor: QueryExecutor) -> Result<Self> {
        let repo = Self {
            junction: registry.get::<X>()?,
            a: registry.get::<A>()?,
            b: registry.get::<B>()?,
            column_a: A::FOREIGN_KEY,
            column_b: B::FOREIGN_KEY,
            executor,
            _phantom: PhantomData,
        };
        repo.check_columns()?;
        Ok(repo)
    }

    /// Override the junction columns referencing `A` and `B`.
    pub fn set_cross_columns(mut self, column_a: &'static str, column_b: &'static str) -> Result<Self> {
        self.column_a = column_a;
        self.column_b = column_b;
        self.check_columns()?;
        Ok(self)
    }

    fn check_columns(&self) -> Result<()> {
        self.junction.require_property(self.column_a)?;
        self.junction.require_property(self.column_b)?;
        if self.column_a == self.column_b {
            return Err(DbAccessError::InvalidOperation(format!(
                "{} cross columns must differ, both are '{}'",
                self.junction.name, self.column_a
            )));
        }
        Ok(())
    }

    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            executor: self.executor.with_cancellation(token),
            ..self.clone()
        }
    }

    pub fn junction(&self) -> &Arc<EntityDescriptor> {
        &self.junction
    }

    /// Junction columns referencing `A` and `B`.
    pub fn cross_columns(&self) -> (&'static str, &'static str) {
        (self.column_a, self.column_b)
    }

    async fn get_linked<T: DbEntity>(
        &self,
        target: &EntityDescriptor,
        cross: CrossSource,
        filters: &[GenericFilter],
        options: &RequestOptions,
    ) -> Result<QueryResult<T>> {
        let query = QueryBuilder::new(target)
            .cross(&cross)
            .filters(filters)
            .options(options)
            .build()?;
        let rows = self.executor.fetch_all(&query).await?;
        let items = rows
            .iter()
            .map(|row| {
                T::from_row(row).map_err(|source| DbAccessError::Materialize {
                    entity: T::NAME,
                    source,
                })
            })
            .collect::<Result<Vec<T>>>()?;
        Ok(QueryResult {
            page: page_info(T::NAME, &rows, items.len(), options)?,
            items,
        })
    }

    /// Every `A` linked to the `B` with id `b_id`.
    pub async fn get_a(
        &self,
        b_id: Uuid,
        filters: &[GenericFilter],
        options: &RequestOptions,
    ) -> Result<QueryResult<A>> {
        let cross = CrossSource {
            junction: self.junction.clone(),
            target_column: self.column_a.to_string(),
            filter_column: self.column_b.to_string(),
            id: b_id,
        };
        self.get_linked(&self.a, cross, filters, options).await
    }

    /// Every `B` linked to the `A` with id `a_id`.
    pub async fn get_b(
        &self,
        a_id: Uuid,
        filters: &[GenericFilter],
        options: &RequestOptions,
    ) -> Result<QueryResult<B>> {
        let cross = CrossSource {
            junction: self.junction.clone(),
            target_column: self.column_b.to_string(),
            filter_column: self.column_a.to_string(),
            id: a_id,
        };
        self.get_linked(&self.b, cross, filters, options).await
    }

    /// Insert the junction row linking `a_id` and `b_id`.
    pub async fn create_cross(&self, a_id: Uuid, b_id: Uuid, context: &AuditContext) -> Result<u64> {
        let pk = self.junction.primary_key;
        let mut values = vec![
            (self.column_a, SqlValue::Uuid(a_id)),
            (self.column_b, SqlValue::Uuid(b_id)),
        ];
        if pk != self.column_a && pk != self.column_b {
            values.push((pk, SqlValue::Uuid(Uuid::new_v4())));
        }
        let query = commands::insert(&self.junction, values)?;
        let affected = self
            .executor
            .execute(&query, self.junction.is_audited(), context)
            .await?;
        tracing::debug!(
            junction = self.junction.name,
            a = %a_id,
            b = %b_id,
            "Created cross link"
        );
        Ok(affected)
    }

    /// Delete the junction rows linking `a_id` and `b_id`.
    pub async fn delete_cross(&self, a_id: Uuid, b_id: Uuid, context: &AuditContext) -> Result<u64> {
        let filters = [
            GenericFilter::equal(self.column_a, a_id),
            GenericFilter::equal(self.column_b, b_id),
        ];
        let query = commands::delete_where(&self.junction, &filters)?;
        self.executor
            .execute(&query, self.junction.is_audited(), context)
            .await
    }
}
