//! Bulk ingestion over the binary COPY protocol
//!
//! Rows are streamed straight into the target table, bypassing the query
//! builder. The column list comes from the live table (probed once per
//! table) intersected with the entity's properties, so extra database
//! columns with defaults are left alone.
//!
//! A value that cannot be encoded for its column is handled according to
//! the configured [`IngestFailurePolicy`].

mod binary;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::Row;

use binary::{BinaryCopyWriter, encode};

use crate::audit::{AuditContext, AuditedSession, is_audit_column};
use crate::db::QueryExecutor;
use crate::error::{DbAccessError, Result};
use crate::orm::{BuiltQuery, DbEntity, DefinitionRegistry, EntityDescriptor, ParamMap, SqlValue};

const PROBE_COLUMNS: &str = "SELECT column_name::text AS column_name, data_type::text AS data_type, \
     is_nullable::text AS is_nullable FROM information_schema.columns \
     WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position";

/// What to do with a value that cannot be written to its column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestFailurePolicy {
    /// Write NULL instead and keep the row (fails if the column is NOT NULL)
    #[default]
    NullColumn,
    /// Drop the whole row
    SkipRow,
    /// Abort the copy
    FailBatch,
}

impl FromStr for IngestFailurePolicy {
    type Err = DbAccessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "null_column" => Ok(Self::NullColumn),
            "skip_row" => Ok(Self::SkipRow),
            "fail_batch" => Ok(Self::FailBatch),
            other => Err(DbAccessError::InvalidOperation(format!(
                "unknown ingest failure policy '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for IngestFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NullColumn => "null_column",
            Self::SkipRow => "skip_row",
            Self::FailBatch => "fail_batch",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Rows between progress checkpoints (and stream flushes)
    pub batch_size: usize,
    pub failure_policy: IngestFailurePolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            failure_policy: IngestFailurePolicy::default(),
        }
    }
}

/// Outcome of one ingest call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Rows accepted by the COPY
    pub rows_written: u64,
    pub rows_skipped: u64,
    /// Values replaced by NULL under [`IngestFailurePolicy::NullColumn`]
    pub nulls_written: u64,
    /// Rows inserted or updated by the MERGE step, if any
    pub rows_merged: u64,
}

/// A column of the live table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LiveColumn {
    pub name: String,
    /// `information_schema` type name, e.g. `uuid`, `character varying`
    pub data_type: String,
    pub nullable: bool,
}

/// Probed column lists keyed by qualified table name.
#[derive(Debug, Default)]
pub struct ColumnCache {
    tables: RwLock<HashMap<String, Arc<[LiveColumn]>>>,
}

impl ColumnCache {
    fn get(&self, table: &str) -> Option<Arc<[LiveColumn]>> {
        self.tables.read().get(table).cloned()
    }

    fn insert(&self, table: String, columns: Arc<[LiveColumn]>) {
        self.tables.write().insert(table, columns);
    }

    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Streams entity batches into their tables.
#[derive(Clone)]
pub struct IngestService {
    registry: Arc<DefinitionRegistry>,
    executor: QueryExecutor,
    config: IngestConfig,
    columns: Arc<ColumnCache>,
}

impl IngestService {
    pub fn new(
        registry: Arc<DefinitionRegistry>,
        executor: QueryExecutor,
        config: IngestConfig,
        columns: Arc<ColumnCache>,
    ) -> Self {
        Self {
            registry,
            executor,
            config,
            columns,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Copy `items` into the entity's table in one transaction.
    pub async fn ingest<T: DbEntity>(
        &self,
        items: &[T],
        context: &AuditContext,
    ) -> Result<IngestReport> {
        let descriptor = self.registry.get::<T>()?;
        let columns = self.ingest_columns(&descriptor).await?;
        let table = descriptor.base.qualified();

        let mut session = self.executor.begin_audited(context).await?;
        let report = self.copy_rows(&mut session, &table, &columns, items).await?;
        session.commit().await?;

        tracing::info!(
            table = %table,
            rows = report.rows_written,
            skipped = report.rows_skipped,
            nulls = report.nulls_written,
            "Ingest completed"
        );
        Ok(report)
    }

    /// Copy `items` into a temporary table shaped like the entity's table,
    /// then merge them in on `match_properties` (the primary key when
    /// empty). Matched rows are updated only when a value changed.
    pub async fn ingest_and_merge<T: DbEntity>(
        &self,
        items: &[T],
        match_properties: &[&str],
        context: &AuditContext,
    ) -> Result<IngestReport> {
        let descriptor = self.registry.get::<T>()?;
        let columns = self.ingest_columns(&descriptor).await?;
        let table = descriptor.base.qualified();

        let keys: Vec<&str> = if match_properties.is_empty() {
            vec![descriptor.primary_key]
        } else {
            match_properties.to_vec()
        };
        for key in &keys {
            let property = descriptor.require_property(key)?;
            if !columns.iter().any(|c| c.name == property.name) {
                return Err(DbAccessError::Ingest {
                    table: table.clone(),
                    reason: format!("match property '{}' is not an ingested column", key),
                });
            }
        }

        let staging = format!("_ingest_{}", descriptor.base.name);
        let mut session = self.executor.begin_audited(context).await?;
        session
            .execute_script(&format!(
                "CREATE TEMP TABLE {staging} (LIKE {table} INCLUDING DEFAULTS) ON COMMIT DROP"
            ))
            .await?;

        let mut report = self
            .copy_rows(&mut session, &staging, &columns, items)
            .await?;

        let merge = merge_sql(&table, &staging, &columns, &keys);
        report.rows_merged = session
            .execute(&BuiltQuery::new(merge, ParamMap::new()))
            .await?;
        session.commit().await?;

        tracing::info!(
            table = %table,
            rows = report.rows_written,
            merged = report.rows_merged,
            skipped = report.rows_skipped,
            "Ingest and merge completed"
        );
        Ok(report)
    }

    /// Columns to copy: live columns that map to entity properties, audit
    /// columns excluded. Probed once per table.
    async fn ingest_columns(&self, entity: &EntityDescriptor) -> Result<Arc<[LiveColumn]>> {
        let table = entity.base.qualified();
        if let Some(columns) = self.columns.get(&table) {
            return Ok(columns);
        }

        let mut params = ParamMap::new();
        params.push("table_schema", SqlValue::Text(entity.base.schema.clone()));
        params.push("table_name", SqlValue::Text(entity.base.name.to_string()));
        let probe = BuiltQuery::new(PROBE_COLUMNS, params);
        let rows = self.executor.fetch_all(&probe).await?;

        let mut columns = Vec::new();
        for row in &rows {
            let decode = |source| DbAccessError::Materialize {
                entity: "information_schema.columns",
                source,
            };
            let name: String = row.try_get("column_name").map_err(decode)?;
            if is_audit_column(&name) || entity.property(&name).is_none() {
                continue;
            }
            let data_type: String = row.try_get("data_type").map_err(decode)?;
            let is_nullable: String = row.try_get("is_nullable").map_err(decode)?;
            columns.push(LiveColumn {
                name,
                data_type,
                nullable: is_nullable == "YES",
            });
        }

        if columns.is_empty() {
            return Err(DbAccessError::Ingest {
                table,
                reason: "no matching columns found in the database".to_string(),
            });
        }

        tracing::debug!(
            table = %table,
            columns = columns.len(),
            "Probed ingest columns"
        );
        let columns: Arc<[LiveColumn]> = columns.into();
        self.columns.insert(table, columns.clone());
        Ok(columns)
    }

    async fn copy_rows<T: DbEntity>(
        &self,
        session: &mut AuditedSession,
        table: &str,
        columns: &[LiveColumn],
        items: &[T],
    ) -> Result<IngestReport> {
        let column_list = columns
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let copy_sql = format!("COPY {table} ({column_list}) FROM STDIN (FORMAT BINARY)");
        let statement = BuiltQuery::new(copy_sql.as_str(), ParamMap::new());
        let executor = session.executor().clone();

        let mut copy = executor
            .run(&statement, session.connection().copy_in_raw(&copy_sql))
            .await?;

        let mut writer = BinaryCopyWriter::new();
        let mut report = IngestReport::default();
        let batch_size = self.config.batch_size.max(1);

        for item in items {
            let row = match self.encode_row(table, columns, item, &mut report) {
                Ok(row) => row,
                Err(e) => {
                    abort(copy, &e).await;
                    return Err(e);
                }
            };
            let Some(row) = row else {
                continue;
            };
            writer.write_row(&row);

            if writer.rows() % batch_size as u64 == 0 {
                let sent = executor
                    .run(&statement, copy.send(writer.take()))
                    .await
                    .map(|_| ());
                if let Err(e) = sent {
                    abort(copy, &e).await;
                    return Err(e);
                }
                tracing::info!(table = %table, rows = writer.rows(), "Ingested rows");
            }
        }

        let sent = executor
            .run(&statement, copy.send(writer.finish()))
            .await
            .map(|_| ());
        if let Err(e) = sent {
            abort(copy, &e).await;
            return Err(e);
        }
        report.rows_written = executor.run(&statement, copy.finish()).await?;
        Ok(report)
    }

    /// Encode one entity. `Ok(None)` means the row was skipped.
    fn encode_row<T: DbEntity>(
        &self,
        table: &str,
        columns: &[LiveColumn],
        item: &T,
        report: &mut IngestReport,
    ) -> Result<Option<Vec<Option<Vec<u8>>>>> {
        let values: HashMap<&str, SqlValue> = item.values().into_iter().collect();
        let mut fields = Vec::with_capacity(columns.len());

        for column in columns {
            let value = match values.get(column.name.as_str()) {
                Some(value) if !value.is_null() => value,
                _ => {
                    fields.push(None);
                    continue;
                }
            };

            let error = match encode(value, &column.name, &column.data_type) {
                Ok(bytes) => {
                    fields.push(Some(bytes));
                    continue;
                }
                Err(e) => e,
            };

            match self.config.failure_policy {
                IngestFailurePolicy::NullColumn if column.nullable => {
                    tracing::warn!(
                        table = %table,
                        column = %column.name,
                        error = %error,
                        "Failed to write value, writing NULL"
                    );
                    report.nulls_written += 1;
                    fields.push(None);
                }
                IngestFailurePolicy::NullColumn => {
                    tracing::error!(
                        table = %table,
                        column = %column.name,
                        error = %error,
                        "Failed to write value into NOT NULL column"
                    );
                    return Err(error);
                }
                IngestFailurePolicy::SkipRow => {
                    tracing::warn!(
                        table = %table,
                        column = %column.name,
                        error = %error,
                        "Failed to write value, skipping row"
                    );
                    report.rows_skipped += 1;
                    return Ok(None);
                }
                IngestFailurePolicy::FailBatch => return Err(error),
            }
        }
        Ok(Some(fields))
    }
}

async fn abort<C>(copy: sqlx::postgres::PgCopyIn<C>, error: &DbAccessError)
where
    C: std::ops::DerefMut<Target = sqlx::PgConnection>,
{
    if let Err(e) = copy.abort(error.to_string()).await {
        tracing::warn!(error = %e, "Failed to abort COPY");
    }
}

/// `MERGE` from the staging table into the target.
fn merge_sql(table: &str, staging: &str, columns: &[LiveColumn], keys: &[&str]) -> String {
    let on = keys
        .iter()
        .map(|k| format!("target.{k} = source.{k}"))
        .collect::<Vec<_>>()
        .join(" AND ");
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    let updatable: Vec<&str> = names
        .iter()
        .copied()
        .filter(|n| !keys.contains(n))
        .collect();

    let mut sql = format!("MERGE INTO {table} AS target USING {staging} AS source ON {on}");
    if !updatable.is_empty() {
        let current = prefixed(&updatable, "target.");
        let incoming = prefixed(&updatable, "source.");
        let set = updatable
            .iter()
            .map(|c| format!("{c} = source.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(
            " WHEN MATCHED AND ({current}) IS DISTINCT FROM ({incoming}) THEN UPDATE SET {set}"
        ));
    }
    sql.push_str(&format!(
        " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
        names.join(", "),
        prefixed(&names, "source.")
    ));
    sql
}

fn prefixed(names: &[&str], prefix: &str) -> String {
    names
        .iter()
        .map(|n| format!("{prefix}{n}"))
        .collect::<Vec<_>>()
        .join(", ")
}
