//! dbaccess maintenance binary
//!
//! Prints and installs the audit trigger scripts for the registered
//! entities.

mod cli;

use std::env;

use anyhow::{Context, Result, bail};
use uuid::Uuid;

use dbaccess::audit::{AuditContext, AuditScripts};
use dbaccess::config::{Config, SchemaConfig};
use dbaccess::db::Database;
use dbaccess::{models, telemetry};

use crate::cli::{CliOptions, Command, USAGE};

/// Actor recorded on audit installation, from the environment or nil.
fn installer_context() -> Result<AuditContext> {
    let read = |name: &str| -> Result<Uuid> {
        match env::var(name) {
            Ok(value) => Uuid::parse_str(&value).with_context(|| format!("Invalid {}", name)),
            Err(_) => Ok(Uuid::nil()),
        }
    };
    Ok(AuditContext::new(
        read("DBACCESS_AUDIT_CHANGED_BY")?,
        read("DBACCESS_AUDIT_CHANGED_BY_SYSTEM")?,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing("dbaccess=info");

    let options = CliOptions::from_args();
    match options.command {
        Command::AuditSql { entity } => {
            let registry = models::registry(&SchemaConfig::from_env())?;
            let Some(descriptor) = registry.find_by_name(&entity) else {
                bail!("Unknown entity: {}", entity);
            };
            let scripts = AuditScripts::for_entity(&descriptor)?;
            println!("{}", scripts.to_sql());
        }
        Command::InstallAudit => {
            let config = Config::from_env()?;
            let registry = models::registry(&config.schemas)?;
            let db = Database::from_config(&config, registry).await?;
            let context = installer_context()?;
            let installer = db.audit_installer(context);

            for descriptor in db.registry().descriptors() {
                if !descriptor.is_audited() {
                    continue;
                }
                let scripts = installer
                    .install(&descriptor)
                    .await
                    .with_context(|| format!("Failed to install audit for {}", descriptor.name))?;
                tracing::info!(entity = descriptor.name, scripts, "Audit installed");
            }
        }
        Command::Entities => {
            let registry = models::registry(&SchemaConfig::from_env())?;
            for descriptor in registry.descriptors() {
                println!(
                    "{:<16} {:<28} translated={} audited={}",
                    descriptor.name,
                    descriptor.base.qualified(),
                    descriptor.is_translated(),
                    descriptor.is_audited()
                );
            }
        }
        Command::Help => {
            eprintln!("{}", USAGE);
        }
    }

    Ok(())
}
