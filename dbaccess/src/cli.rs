//! Minimal CLI parsing for the maintenance commands.

use std::env;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the audit scripts of one entity
    AuditSql { entity: String },
    /// Install audit triggers for every audited entity
    InstallAudit,
    /// List registered entities
    Entities,
    Help,
}

#[derive(Debug)]
pub struct CliOptions {
    pub command: Command,
}

impl CliOptions {
    pub fn from_args() -> Self {
        Self::parse(env::args().skip(1))
    }

    pub fn parse(args: impl IntoIterator<Item = String>) -> Self {
        let mut args = args.into_iter();
        let command = match args.next().as_deref() {
            Some("audit-sql") => match args.next() {
                Some(entity) => Command::AuditSql { entity },
                None => Command::Help,
            },
            Some(arg) if arg.starts_with("audit-sql=") => match arg.split_once('=') {
                Some((_, entity)) if !entity.is_empty() => Command::AuditSql {
                    entity: entity.to_string(),
                },
                _ => Command::Help,
            },
            Some("install-audit") => Command::InstallAudit,
            Some("entities") => Command::Entities,
            _ => Command::Help,
        };
        CliOptions { command }
    }
}

pub const USAGE: &str = "usage: dbaccess <command>

commands:
  audit-sql <Entity>   print the audit trigger scripts for an entity
  install-audit        install audit triggers for every audited entity
  entities             list registered entities";

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Command {
        CliOptions::parse(args.iter().map(|a| a.to_string())).command
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse(&["audit-sql", "Role"]),
            Command::AuditSql {
                entity: "Role".to_string()
            }
        );
        assert_eq!(
            parse(&["audit-sql=Package"]),
            Command::AuditSql {
                entity: "Package".to_string()
            }
        );
        assert_eq!(parse(&["install-audit"]), Command::InstallAudit);
        assert_eq!(parse(&["entities"]), Command::Entities);
    }

    #[test]
    fn test_incomplete_or_unknown_is_help() {
        assert_eq!(parse(&[]), Command::Help);
        assert_eq!(parse(&["audit-sql"]), Command::Help);
        assert_eq!(parse(&["--serve"]), Command::Help);
    }
}
