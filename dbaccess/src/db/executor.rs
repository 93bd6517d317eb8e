//! Statement execution with logging and cancellation.

use std::future::Future;
use std::sync::Arc;

use sqlx::PgPool;
use sqlx::postgres::PgRow;
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditContext, AuditedSession};
use crate::error::{DbAccessError, Result};
use crate::orm::{BuiltQuery, ParamMap, SqlValue};
use crate::telemetry::QueryHashCache;

const SET_AS_OF: &str = "SELECT set_config('app.asof', $1, true)";

/// Runs built statements against the pool.
///
/// Failing statements are logged with their SQL and parameters before the
/// error is returned. Nothing is retried.
#[derive(Clone)]
pub struct QueryExecutor {
    pool: PgPool,
    shapes: Arc<QueryHashCache>,
    cancel: Option<CancellationToken>,
}

impl QueryExecutor {
    pub fn new(pool: PgPool, shapes: Arc<QueryHashCache>) -> Self {
        Self {
            pool,
            shapes,
            cancel: None,
        }
    }

    /// Same pool, but every statement aborts when `token` is cancelled.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            cancel: Some(token),
            ..self.clone()
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Await a driver future for `query`, racing it against cancellation.
    pub(crate) async fn run<T, F>(&self, query: &BuiltQuery, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        let shape = self.shapes.observe(&query.sql);
        if shape.first_seen {
            tracing::debug!(query_hash = %shape.hash, sql = %query.sql, "Executing new statement shape");
        } else {
            tracing::trace!(query_hash = %shape.hash, "Executing statement");
        }

        let result = match &self.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        tracing::warn!(query_hash = %shape.hash, "Statement cancelled");
                        return Err(DbAccessError::Cancelled);
                    }
                    result = fut => result,
                }
            }
            None => fut.await,
        };

        result.map_err(|e| {
            tracing::error!(
                query_hash = %shape.hash,
                sql = %query.sql,
                params = %query.describe_params(),
                error = %e,
                "Statement failed"
            );
            DbAccessError::execution(query.sql.clone(), e)
        })
    }

    /// Fetch all rows. As-of queries run in a read transaction with
    /// `app.asof` set so history views resolve the right versions.
    pub async fn fetch_all(&self, query: &BuiltQuery) -> Result<Vec<PgRow>> {
        let Some(as_of) = query.as_of else {
            return self.run(query, query.query().fetch_all(&self.pool)).await;
        };

        let begin = BuiltQuery::new("BEGIN", ParamMap::new());
        let mut tx = self.run(&begin, self.pool.begin()).await?;

        let mut params = ParamMap::new();
        params.push("_asof", SqlValue::Text(as_of.to_rfc3339()));
        let set_as_of = BuiltQuery::new(SET_AS_OF, params);
        self.run(&set_as_of, set_as_of.query().execute(&mut *tx))
            .await?;

        let rows = self.run(query, query.query().fetch_all(&mut *tx)).await?;

        let commit = BuiltQuery::new("COMMIT", ParamMap::new());
        self.run(&commit, tx.commit()).await?;
        Ok(rows)
    }

    pub async fn fetch_optional(&self, query: &BuiltQuery) -> Result<Option<PgRow>> {
        Ok(self.fetch_all(query).await?.into_iter().next())
    }

    /// Execute a write. Audited tables get an audited transaction around
    /// the statement; other tables run it directly.
    pub async fn execute(
        &self,
        query: &BuiltQuery,
        audited: bool,
        context: &AuditContext,
    ) -> Result<u64> {
        if !audited {
            let result = self.run(query, query.query().execute(&self.pool)).await?;
            return Ok(result.rows_affected());
        }

        let mut session = self.begin_audited(context).await?;
        let affected = session.execute(query).await?;
        session.commit().await?;
        Ok(affected)
    }

    /// Open an audited transaction.
    pub async fn begin_audited(&self, context: &AuditContext) -> Result<AuditedSession> {
        AuditedSession::begin(self, context).await
    }
}
