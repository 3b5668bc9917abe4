// issue.rs — Issue subcommands: report, resolve, list, summary.

use clap::Subcommand;
use dt_execution::DistributionService;
use dt_issue::{Issue, IssueFilter, IssueLocation, IssueSeverity, IssueTracker, IssueType};

#[derive(Subcommand)]
pub enum IssueCommands {
    /// Report an issue against an execution.
    Report {
        /// Execution ID.
        execution_id: String,
        /// Issue type: vehicle_breakdown, weather_delay, traffic_jam,
        /// access_denied, recipient_unavailable, food_quality, shortage,
        /// other.
        #[arg(long = "type")]
        issue_type: String,
        /// Severity: low, medium, high, critical.
        #[arg(long)]
        severity: String,
        /// What happened.
        #[arg(long)]
        description: String,
        /// Affected delivery IDs.
        #[arg(long)]
        delivery: Vec<String>,
        /// Latitude at report time.
        #[arg(long)]
        lat: Option<f64>,
        /// Longitude at report time.
        #[arg(long)]
        lng: Option<f64>,
    },
    /// Resolve an open issue.
    Resolve {
        /// Issue ID.
        id: String,
        /// How it was resolved.
        #[arg(long)]
        notes: String,
    },
    /// List issues.
    List {
        /// Filter by execution ID.
        #[arg(long)]
        execution: Option<String>,
        /// Filter by severity.
        #[arg(long)]
        severity: Option<String>,
        /// Only open issues.
        #[arg(long)]
        open: bool,
    },
    /// Summarize issues by severity and type.
    Summary {
        /// Restrict to one execution.
        #[arg(long)]
        execution: Option<String>,
    },
}

pub fn execute(
    cmd: &IssueCommands,
    service: &DistributionService,
    actor: &str,
) -> anyhow::Result<()> {
    let tracker = IssueTracker::attach(service)?;

    match cmd {
        IssueCommands::Report {
            execution_id,
            issue_type,
            severity,
            description,
            delivery,
            lat,
            lng,
        } => {
            let issue_type = IssueType::parse(issue_type)
                .ok_or_else(|| anyhow::anyhow!("unknown issue type: {issue_type}"))?;
            let severity = IssueSeverity::parse(severity)
                .ok_or_else(|| anyhow::anyhow!("unknown severity: {severity}"))?;
            let delivery_ids = delivery
                .iter()
                .map(|d| uuid::Uuid::parse_str(d))
                .collect::<Result<Vec<_>, _>>()?;

            let mut issue = Issue::new(
                uuid::Uuid::parse_str(execution_id)?,
                issue_type,
                severity,
                description,
                actor,
            )
            .with_deliveries(delivery_ids);
            if let (Some(lat), Some(lng)) = (lat, lng) {
                issue = issue.with_location(IssueLocation {
                    latitude: *lat,
                    longitude: *lng,
                    description: None,
                });
            }

            let issue = tracker.report(issue)?;
            println!("Issue reported: {}", issue.issue_id);
            println!("  Type:     {}", issue.issue_type);
            println!("  Severity: {}", issue.severity);
            Ok(())
        }
        IssueCommands::Resolve { id, notes } => {
            let issue = tracker.resolve(uuid::Uuid::parse_str(id)?, notes, actor)?;
            println!("Issue resolved: {}", issue.issue_id);
            Ok(())
        }
        IssueCommands::List {
            execution,
            severity,
            open,
        } => {
            let severity = match severity.as_deref() {
                Some(s) => Some(
                    IssueSeverity::parse(s)
                        .ok_or_else(|| anyhow::anyhow!("unknown severity: {s}"))?,
                ),
                None => None,
            };
            let execution_id = execution
                .as_deref()
                .map(uuid::Uuid::parse_str)
                .transpose()?;
            let issues = tracker.list(&IssueFilter {
                execution_id,
                severity,
                resolved: open.then_some(false),
                ..Default::default()
            })?;

            if issues.is_empty() {
                println!("No issues found.");
                return Ok(());
            }

            println!(
                "{:<38} {:<22} {:<9} {:<9} {}",
                "ID", "TYPE", "SEVERITY", "STATE", "REPORTED"
            );
            println!("{}", "-".repeat(100));
            for i in &issues {
                println!(
                    "{:<38} {:<22} {:<9} {:<9} {}",
                    i.issue_id,
                    i.issue_type.to_string(),
                    i.severity.to_string(),
                    if i.is_resolved() { "resolved" } else { "open" },
                    i.reported_at.format("%Y-%m-%d %H:%M"),
                );
            }
            println!("\n{} issue(s) total.", issues.len());
            Ok(())
        }
        IssueCommands::Summary { execution } => {
            let execution_id = execution
                .as_deref()
                .map(uuid::Uuid::parse_str)
                .transpose()?;
            let summary = tracker.summary(execution_id)?;

            println!(
                "Issues: {} total ({} open, {} resolved)",
                summary.total, summary.open, summary.resolved
            );
            if !summary.by_severity.is_empty() {
                println!("By severity:");
                for (severity, count) in &summary.by_severity {
                    println!("  {severity:<10} {count}");
                }
            }
            if !summary.by_type.is_empty() {
                println!("By type:");
                for (issue_type, count) in &summary.by_type {
                    println!("  {issue_type:<22} {count}");
                }
            }
            Ok(())
        }
    }
}
