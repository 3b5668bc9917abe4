// audit.rs — Audit subcommands: verify, tail, query.

use clap::Subcommand;
use dt_audit::{AuditAction, AuditError, AuditFilter, AuditTrail};
use dt_execution::DistConfig;

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Verify the audit trail hash chain integrity.
    Verify,
    /// Show recent audit entries.
    Tail {
        /// Number of entries to show.
        #[arg(short, default_value = "10")]
        n: usize,
    },
    /// Show the audit history of one entity (execution, delivery, issue).
    Query {
        /// Entity ID. Execution IDs also match entries for their deliveries
        /// and issues.
        entity_id: String,
        /// Filter by action (e.g., "status_change", "complete").
        #[arg(long)]
        action: Option<String>,
        /// Maximum number of entries.
        #[arg(long)]
        limit: Option<usize>,
        /// Entries to skip before collecting.
        #[arg(long, default_value = "0")]
        offset: usize,
    },
}

pub fn execute(cmd: &AuditCommands, config: &DistConfig) -> anyhow::Result<()> {
    let path = &config.audit_log;

    match cmd {
        AuditCommands::Verify => {
            if !path.exists() {
                println!("No audit trail found at {}", path.display());
                return Ok(());
            }

            match AuditTrail::verify_chain(path) {
                Ok(_) => {
                    let entries = AuditTrail::read_all(path)?;
                    println!(
                        "Audit trail verified: {} entry(ies), hash chain intact.",
                        entries.len()
                    );
                }
                Err(AuditError::IntegrityViolation {
                    line,
                    expected,
                    actual,
                }) => {
                    println!("INTEGRITY VIOLATION at line {line}:");
                    println!("  Expected previous_hash: {expected}");
                    println!("  Actual previous_hash:   {actual}");
                    println!();
                    println!("The audit trail may have been tampered with.");
                    anyhow::bail!("Audit trail integrity check failed");
                }
                Err(e) => return Err(e.into()),
            }
            Ok(())
        }

        AuditCommands::Tail { n } => {
            if !path.exists() {
                println!("No audit trail found at {}", path.display());
                return Ok(());
            }

            let entries = AuditTrail::read_all(path)?;
            let start = entries.len().saturating_sub(*n);
            let recent = &entries[start..];

            if recent.is_empty() {
                println!("No audit entries.");
                return Ok(());
            }

            print_entries(recent);
            Ok(())
        }

        AuditCommands::Query {
            entity_id,
            action,
            limit,
            offset,
        } => {
            let action = match action.as_deref() {
                Some(a) => Some(
                    AuditAction::parse(a).ok_or_else(|| anyhow::anyhow!("unknown action: {a}"))?,
                ),
                None => None,
            };
            let entries = AuditTrail::query(
                path,
                uuid::Uuid::parse_str(entity_id)?,
                &AuditFilter {
                    action,
                    limit: *limit,
                    offset: *offset,
                },
            )?;

            if entries.is_empty() {
                println!("No audit entries for {entity_id}.");
                return Ok(());
            }
            print_entries(&entries);
            Ok(())
        }
    }
}

fn print_entries(entries: &[dt_audit::AuditEntry]) {
    println!(
        "{:<20} {:<10} {:<14} {:<12} {}",
        "TIMESTAMP", "ENTITY", "ACTION", "ACTOR", "DESCRIPTION"
    );
    println!("{}", "-".repeat(90));

    for entry in entries {
        println!(
            "{:<20} {:<10} {:<14} {:<12} {}",
            entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            format!("{:?}", entry.entity_type).to_lowercase(),
            format!("{:?}", entry.action).to_lowercase(),
            entry.actor,
            entry.description.as_deref().unwrap_or("-"),
        );
    }
}
