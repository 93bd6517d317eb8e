//! Audit trail and temporal storage
//!
//! Audited tables carry `audit_changedby`, `audit_changedbysystem`,
//! `audit_changeoperation` and `audit_validfrom` columns stamped by an insert
//! trigger from session variables. Update and delete triggers copy the
//! pre-image into `{schema}_history.audit_{table}` with `audit_validto` set,
//! so every version of a row covers a half-open interval
//! `[audit_validfrom, audit_validto)`. A view `{schema}_history.{table}`
//! resolves the version valid at `app.asof`.
//!
//! Writes reach audited tables through an [`AuditedSession`], which sets the
//! session variables and the `session_audit_context` temp table the delete
//! trigger reads.

mod scripts;
mod session;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use scripts::{AuditInstaller, AuditScript, AuditScripts};
pub use session::AuditedSession;

/// Who is changing data, and as part of which operation.
///
/// Required by every write so the audit actor is never silently NULL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    /// Acting user or party
    pub changed_by: Uuid,
    /// System performing the change on the actor's behalf
    pub changed_by_system: Uuid,
    /// Correlates all rows touched by one logical operation
    pub change_operation_id: String,
}

impl AuditContext {
    /// New context with a fresh operation id.
    pub fn new(changed_by: Uuid, changed_by_system: Uuid) -> Self {
        Self {
            changed_by,
            changed_by_system,
            change_operation_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_operation(mut self, change_operation_id: impl Into<String>) -> Self {
        self.change_operation_id = change_operation_id.into();
        self
    }
}

/// Audit columns present on every audited base table.
pub const AUDIT_COLUMNS: &[&str] = &[
    "audit_changedby",
    "audit_changedbysystem",
    "audit_changeoperation",
    "audit_validfrom",
];

/// True for engine-managed audit columns.
pub fn is_audit_column(name: &str) -> bool {
    name.starts_with("audit_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_gets_operation_id() {
        let a = AuditContext::new(Uuid::new_v4(), Uuid::new_v4());
        let b = AuditContext::new(a.changed_by, a.changed_by_system);
        assert_ne!(a.change_operation_id, b.change_operation_id);

        let c = b.with_operation("import-2024");
        assert_eq!(c.change_operation_id, "import-2024");
    }

    #[test]
    fn test_audit_columns() {
        assert!(AUDIT_COLUMNS.iter().all(|c| is_audit_column(c)));
        assert!(!is_audit_column("name"));
    }
}
