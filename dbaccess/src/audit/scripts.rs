//! Audit trigger and history DDL per audited table.

use crate::db::QueryExecutor;
use crate::error::{DbAccessError, Result};
use crate::orm::{EntityDescriptor, HistoryRef, TableRef};

use super::AuditContext;

const AS_OF: &str = "coalesce(NULLIF(current_setting('app.asof', true), '')::timestamptz, now())";

/// One named DDL statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditScript {
    pub name: String,
    pub sql: String,
}

/// Renders the audit contract for one table.
struct TableAudit<'a> {
    table: &'a TableRef,
    history: &'a HistoryRef,
    /// Data columns, sorted, never `audit_*`
    columns: Vec<&'a str>,
}

impl TableAudit<'_> {
    fn function(&self, kind: &str) -> String {
        format!("{}.audit_{}_{}_fn", self.table.schema, self.table.name, kind)
    }

    fn trigger(&self, kind: &str) -> String {
        format!("audit_{}_{}_trg", self.table.name, kind)
    }

    fn old_columns(&self) -> String {
        self.columns
            .iter()
            .map(|c| format!("OLD.{}", c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn scripts(&self) -> Vec<AuditScript> {
        let table = self.table.qualified();
        let history = self.history.table.qualified();
        let view = self.history.view.qualified();
        let columns = self.columns.join(", ");
        let old_columns = self.old_columns();

        let mut scripts = Vec::new();
        let mut add = |name: String, sql: String| scripts.push(AuditScript { name, sql });

        add(
            format!("SCHEMA {}", self.history.table.schema),
            format!("CREATE SCHEMA IF NOT EXISTS {}", self.history.table.schema),
        );

        add(
            format!("AUDIT COLUMNS {}", table),
            format!(
                "ALTER TABLE {table} \
                 ADD COLUMN IF NOT EXISTS audit_changedby uuid, \
                 ADD COLUMN IF NOT EXISTS audit_changedbysystem uuid, \
                 ADD COLUMN IF NOT EXISTS audit_changeoperation text, \
                 ADD COLUMN IF NOT EXISTS audit_validfrom timestamptz NOT NULL DEFAULT now()"
            ),
        );

        add(
            format!("TABLE {}", history),
            format!(
                "CREATE TABLE IF NOT EXISTS {history} (LIKE {table}); \
                 ALTER TABLE {history} \
                 ADD COLUMN IF NOT EXISTS audit_validto timestamptz, \
                 ADD COLUMN IF NOT EXISTS audit_deletedby uuid, \
                 ADD COLUMN IF NOT EXISTS audit_deletedbysystem uuid, \
                 ADD COLUMN IF NOT EXISTS audit_deleteoperation text"
            ),
        );

        let insert_fn = self.function("insert");
        add(
            format!("FUNCTION {}", insert_fn),
            format!(
                "CREATE OR REPLACE FUNCTION {insert_fn}() RETURNS TRIGGER AS $$
BEGIN
    IF TG_OP = 'UPDATE' OR NEW.audit_changedby IS NULL THEN
        NEW.audit_changedby := NULLIF(current_setting('app.changed_by', true), '')::uuid;
    END IF;
    IF TG_OP = 'UPDATE' OR NEW.audit_changedbysystem IS NULL THEN
        NEW.audit_changedbysystem := NULLIF(current_setting('app.changed_by_system', true), '')::uuid;
    END IF;
    IF TG_OP = 'UPDATE' OR NEW.audit_changeoperation IS NULL THEN
        NEW.audit_changeoperation := NULLIF(current_setting('app.change_operation_id', true), '');
    END IF;
    IF TG_OP = 'UPDATE' OR NEW.audit_validfrom IS NULL THEN
        NEW.audit_validfrom := now();
    END IF;
    RETURN NEW;
END;
$$ LANGUAGE plpgsql"
            ),
        );

        let update_fn = self.function("update");
        add(
            format!("FUNCTION {}", update_fn),
            format!(
                "CREATE OR REPLACE FUNCTION {update_fn}() RETURNS TRIGGER AS $$
BEGIN
    INSERT INTO {history} ({columns}, audit_changedby, audit_changedbysystem, audit_changeoperation, audit_validfrom, audit_validto)
    VALUES ({old_columns}, OLD.audit_changedby, OLD.audit_changedbysystem, OLD.audit_changeoperation, OLD.audit_validfrom, now());
    RETURN NEW;
END;
$$ LANGUAGE plpgsql"
            ),
        );

        let delete_fn = self.function("delete");
        add(
            format!("FUNCTION {}", delete_fn),
            format!(
                "CREATE OR REPLACE FUNCTION {delete_fn}() RETURNS TRIGGER AS $$
DECLARE
    ctx RECORD;
BEGIN
    SELECT * INTO ctx FROM session_audit_context LIMIT 1;
    INSERT INTO {history} ({columns}, audit_changedby, audit_changedbysystem, audit_changeoperation, audit_validfrom, audit_validto, audit_deletedby, audit_deletedbysystem, audit_deleteoperation)
    VALUES ({old_columns}, OLD.audit_changedby, OLD.audit_changedbysystem, OLD.audit_changeoperation, OLD.audit_validfrom, now(), ctx.changed_by, ctx.changed_by_system, ctx.change_operation_id);
    RETURN OLD;
END;
$$ LANGUAGE plpgsql"
            ),
        );

        let guarded = |name: String, timing: &str, function: &str| {
            format!(
                "IF NOT EXISTS (SELECT 1 FROM pg_trigger WHERE tgname = '{name}' AND tgrelid = '{table}'::regclass) THEN
        CREATE TRIGGER {name} {timing} ON {table} FOR EACH ROW EXECUTE FUNCTION {function}();
    END IF;"
            )
        };
        add(
            format!("TRIGGERS {}", table),
            format!(
                "DO $$
BEGIN
    {}
    {}
    {}
END $$",
                guarded(self.trigger("insert"), "BEFORE INSERT OR UPDATE", &insert_fn),
                guarded(self.trigger("update"), "AFTER UPDATE", &update_fn),
                guarded(self.trigger("delete"), "AFTER DELETE", &delete_fn),
            ),
        );

        add(
            format!("VIEW {}", view),
            format!(
                "CREATE OR REPLACE VIEW {view} AS \
                 SELECT {columns}, audit_changedby, audit_changedbysystem, audit_changeoperation, audit_validfrom, audit_validto \
                 FROM {history} \
                 WHERE audit_validfrom <= {AS_OF} AND audit_validto > {AS_OF} \
                 UNION ALL \
                 SELECT {columns}, audit_changedby, audit_changedbysystem, audit_changeoperation, audit_validfrom, NULL::timestamptz AS audit_validto \
                 FROM {table} \
                 WHERE audit_validfrom <= {AS_OF}"
            ),
        );

        scripts
    }
}

/// Every script needed to audit one entity (and its translation table).
#[derive(Debug, Clone)]
pub struct AuditScripts {
    pub entity: &'static str,
    pub scripts: Vec<AuditScript>,
}

impl AuditScripts {
    pub fn for_entity(entity: &EntityDescriptor) -> Result<Self> {
        let history = entity.history.as_ref().ok_or_else(|| {
            DbAccessError::InvalidOperation(format!("{} is not audited", entity.name))
        })?;

        let columns: Vec<&str> = entity
            .sorted_property_names()
            .into_iter()
            .filter(|c| !super::is_audit_column(c))
            .collect();
        let mut scripts = TableAudit {
            table: &entity.base,
            history,
            columns,
        }
        .scripts();

        if let (Some(table), Some(history)) = (&entity.translation, &entity.translation_history) {
            let mut columns: Vec<&str> = entity.translatable().map(|p| p.name).collect();
            columns.push(entity.primary_key);
            columns.push("language");
            columns.sort_unstable();
            scripts.extend(
                TableAudit {
                    table,
                    history,
                    columns,
                }
                .scripts(),
            );
        }

        Ok(Self {
            entity: entity.name,
            scripts,
        })
    }

    /// All statements as one script, for printing.
    pub fn to_sql(&self) -> String {
        self.scripts
            .iter()
            .map(|s| format!("-- {}\n{};\n", s.name, s.sql))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Installs audit scripts inside one transaction per entity.
pub struct AuditInstaller {
    executor: QueryExecutor,
    context: AuditContext,
}

impl AuditInstaller {
    pub fn new(executor: QueryExecutor, context: AuditContext) -> Self {
        Self { executor, context }
    }

    pub async fn install(&self, entity: &EntityDescriptor) -> Result<usize> {
        let scripts = AuditScripts::for_entity(entity)?;
        let mut session = self.executor.begin_audited(&self.context).await?;
        for script in &scripts.scripts {
            tracing::debug!(entity = entity.name, script = %script.name, "Applying audit script");
            session.execute_script(&script.sql).await?;
        }
        session.commit().await?;

        tracing::info!(
            entity = entity.name,
            scripts = scripts.scripts.len(),
            "Audit triggers installed"
        );
        Ok(scripts.scripts.len())
    }
}
