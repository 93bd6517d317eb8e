use sqlx::{PgConnection, Postgres, Transaction};

use super::AuditContext;
use crate::db::QueryExecutor;
use crate::error::Result;
use crate::orm::{BuiltQuery, ParamMap, SqlValue};

const SET_SESSION_VARIABLES: &str = "SELECT set_config('app.changed_by', $1, true), \
     set_config('app.changed_by_system', $2, true), \
     set_config('app.change_operation_id', $3, true)";

const CREATE_CONTEXT_TABLE: &str = "CREATE TEMP TABLE IF NOT EXISTS session_audit_context \
     (changed_by uuid, changed_by_system uuid, change_operation_id text) ON COMMIT DROP";

const CLEAR_CONTEXT_TABLE: &str = "TRUNCATE session_audit_context";

const FILL_CONTEXT_TABLE: &str = "INSERT INTO session_audit_context \
     (changed_by, changed_by_system, change_operation_id) VALUES ($1, $2, $3)";

/// A transaction with the audit actor established.
///
/// Every statement executed through the session is recorded against the
/// same [`AuditContext`]. Dropping the session without `commit` rolls back.
pub struct AuditedSession {
    tx: Transaction<'static, Postgres>,
    executor: QueryExecutor,
    context: AuditContext,
}

impl AuditedSession {
    pub(crate) async fn begin(executor: &QueryExecutor, context: &AuditContext) -> Result<Self> {
        let begin = BuiltQuery::new("BEGIN", ParamMap::new());
        let tx = executor.run(&begin, executor.pool().begin()).await?;
        let mut session = Self {
            tx,
            executor: executor.clone(),
            context: context.clone(),
        };
        session.establish_context().await?;
        Ok(session)
    }

    async fn establish_context(&mut self) -> Result<()> {
        let mut params = ParamMap::new();
        params.push("changed_by", SqlValue::Text(self.context.changed_by.to_string()));
        params.push(
            "changed_by_system",
            SqlValue::Text(self.context.changed_by_system.to_string()),
        );
        params.push(
            "change_operation_id",
            SqlValue::Text(self.context.change_operation_id.clone()),
        );
        self.execute(&BuiltQuery::new(SET_SESSION_VARIABLES, params))
            .await?;

        self.execute(&BuiltQuery::new(CREATE_CONTEXT_TABLE, ParamMap::new()))
            .await?;
        self.execute(&BuiltQuery::new(CLEAR_CONTEXT_TABLE, ParamMap::new()))
            .await?;

        let mut params = ParamMap::new();
        params.push("changed_by", SqlValue::Uuid(self.context.changed_by));
        params.push("changed_by_system", SqlValue::Uuid(self.context.changed_by_system));
        params.push(
            "change_operation_id",
            SqlValue::Text(self.context.change_operation_id.clone()),
        );
        self.execute(&BuiltQuery::new(FILL_CONTEXT_TABLE, params))
            .await?;

        tracing::debug!(
            changed_by = %self.context.changed_by,
            changed_by_system = %self.context.changed_by_system,
            change_operation_id = %self.context.change_operation_id,
            "Audit context established"
        );
        Ok(())
    }

    pub fn context(&self) -> &AuditContext {
        &self.context
    }

    /// Execute one statement, returning the number of affected rows.
    pub async fn execute(&mut self, query: &BuiltQuery) -> Result<u64> {
        let result = self
            .executor
            .run(query, query.query().execute(&mut *self.tx))
            .await?;
        Ok(result.rows_affected())
    }

    /// Run a script through the simple query protocol.
    pub async fn execute_script(&mut self, script: &str) -> Result<()> {
        let built = BuiltQuery::new(script, ParamMap::new());
        self.executor
            .run(&built, sqlx::raw_sql(script).execute(&mut *self.tx))
            .await?;
        Ok(())
    }

    /// Underlying connection, for COPY streams.
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    pub(crate) fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub async fn commit(self) -> Result<()> {
        let commit = BuiltQuery::new("COMMIT", ParamMap::new());
        self.executor.run(&commit, self.tx.commit()).await
    }

    pub async fn rollback(self) -> Result<()> {
        let rollback = BuiltQuery::new("ROLLBACK", ParamMap::new());
        self.executor.run(&rollback, self.tx.rollback()).await
    }
}
