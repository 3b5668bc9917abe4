// execution.rs — Execution subcommands: start, list, status, progress,
// complete, cancel, delete, weather, stats.

use chrono::Utc;
use clap::Subcommand;
use dt_execution::{
    DistributionService, Execution, ExecutionFilter, ExecutionStatus, ProgressUpdate, Weather,
};

#[derive(Subcommand)]
pub enum ExecutionCommands {
    /// Start an execution from a schedule.
    Start {
        /// Schedule ID to activate.
        schedule_id: String,
        /// Operator notes.
        #[arg(long)]
        notes: Option<String>,
    },
    /// List executions.
    List {
        /// Filter by status (e.g., "preparing", "in_transit", "completed").
        #[arg(long)]
        status: Option<String>,
        /// Case-insensitive search over code and notes.
        #[arg(long)]
        search: Option<String>,
        /// Only executions with reported issues.
        #[arg(long)]
        with_issues: bool,
        /// Only runs created at or after this instant (RFC 3339 or
        /// YYYY-MM-DD).
        #[arg(long)]
        from: Option<String>,
        /// Only runs created at or before this instant.
        #[arg(long)]
        to: Option<String>,
    },
    /// Show details for one execution.
    Status {
        /// Execution ID.
        id: String,
    },
    /// Apply a manual progress correction.
    Progress {
        /// Execution ID.
        id: String,
        /// Corrected total portions delivered.
        #[arg(long)]
        portions: Option<u32>,
        /// Corrected total beneficiaries reached.
        #[arg(long)]
        beneficiaries: Option<u32>,
        /// Replacement notes.
        #[arg(long)]
        notes: Option<String>,
    },
    /// Finalize an execution (all deliveries must be closed).
    Complete {
        /// Execution ID.
        id: String,
        /// Closing notes.
        #[arg(long)]
        notes: Option<String>,
    },
    /// Cancel an execution.
    Cancel {
        /// Execution ID.
        id: String,
        /// Why the run is being cancelled.
        #[arg(long)]
        reason: String,
    },
    /// Delete a terminal execution and its deliveries.
    Delete {
        /// Execution ID.
        id: String,
    },
    /// Record a weather observation.
    Weather {
        /// Execution ID.
        id: String,
        /// Condition (e.g., "light rain").
        #[arg(long)]
        condition: String,
        /// Temperature in Celsius.
        #[arg(long)]
        temperature: f64,
        /// Relative humidity percentage.
        #[arg(long)]
        humidity: f64,
    },
    /// Aggregate statistics across executions.
    Stats {
        /// Count runs created at or after this instant (RFC 3339 or
        /// YYYY-MM-DD).
        #[arg(long)]
        from: Option<String>,
        /// Count runs created at or before this instant.
        #[arg(long)]
        to: Option<String>,
    },
}

/// Parse a range bound: an RFC 3339 instant, or a plain date taken as
/// midnight UTC.
fn parse_instant(s: &str) -> anyhow::Result<chrono::DateTime<Utc>> {
    if let Ok(t) = chrono::DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    s.parse::<chrono::NaiveDate>()
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| anyhow::anyhow!("unparseable instant: {s} (want RFC 3339 or YYYY-MM-DD)"))
}

fn parse_range(
    from: &Option<String>,
    to: &Option<String>,
) -> anyhow::Result<(Option<chrono::DateTime<Utc>>, Option<chrono::DateTime<Utc>>)> {
    let from = from.as_deref().map(parse_instant).transpose()?;
    let to = to.as_deref().map(parse_instant).transpose()?;
    Ok((from, to))
}

pub fn execute(
    cmd: &ExecutionCommands,
    service: &DistributionService,
    actor: &str,
) -> anyhow::Result<()> {
    match cmd {
        ExecutionCommands::Start { schedule_id, notes } => {
            let schedule_id = uuid::Uuid::parse_str(schedule_id)?;
            let execution = service.start_execution(schedule_id, actor, notes.clone())?;
            println!("Execution started: {}", execution.execution_id);
            println!("  Code:    {}", execution.distribution_code);
            println!("  Status:  {}", execution.status);
            println!("  Targets: {}", execution.metrics.delivery_count);
            Ok(())
        }
        ExecutionCommands::List {
            status,
            search,
            with_issues,
            from,
            to,
        } => {
            let status = match status.as_deref() {
                Some(s) => Some(
                    ExecutionStatus::parse(s)
                        .ok_or_else(|| anyhow::anyhow!("unknown status: {s}"))?,
                ),
                None => None,
            };
            let (from, to) = parse_range(from, to)?;
            let executions = service.list_executions(&ExecutionFilter {
                status,
                search: search.clone(),
                has_issues: with_issues.then_some(true),
                from,
                to,
                ..Default::default()
            })?;
            list_executions(&executions);
            Ok(())
        }
        ExecutionCommands::Status { id } => {
            let execution = service.get_execution(uuid::Uuid::parse_str(id)?)?;
            show_status(&execution);
            Ok(())
        }
        ExecutionCommands::Progress {
            id,
            portions,
            beneficiaries,
            notes,
        } => {
            let execution = service.update_progress(
                uuid::Uuid::parse_str(id)?,
                actor,
                &ProgressUpdate {
                    total_portions_delivered: *portions,
                    total_beneficiaries_reached: *beneficiaries,
                    notes: notes.clone(),
                },
            )?;
            println!(
                "Progress updated: {}/{} portions ({:.0}%)",
                execution.metrics.total_portions_delivered,
                execution.planned_portions,
                execution.metrics.progress_ratio * 100.0
            );
            Ok(())
        }
        ExecutionCommands::Complete { id, notes } => {
            let execution =
                service.complete_execution(uuid::Uuid::parse_str(id)?, actor, notes.clone())?;
            println!("Execution completed: {}", execution.execution_id);
            println!(
                "  Delivered: {}/{} portions to {} beneficiaries",
                execution.metrics.total_portions_delivered,
                execution.planned_portions,
                execution.metrics.total_beneficiaries_reached
            );
            Ok(())
        }
        ExecutionCommands::Cancel { id, reason } => {
            let execution = service.cancel_execution(uuid::Uuid::parse_str(id)?, actor, reason)?;
            println!("Execution cancelled: {}", execution.execution_id);
            Ok(())
        }
        ExecutionCommands::Delete { id } => {
            let id = uuid::Uuid::parse_str(id)?;
            service.delete_execution(id, actor)?;
            println!("Deleted execution: {id}");
            Ok(())
        }
        ExecutionCommands::Weather {
            id,
            condition,
            temperature,
            humidity,
        } => {
            service.set_weather(
                uuid::Uuid::parse_str(id)?,
                actor,
                Weather {
                    condition: condition.clone(),
                    temperature_c: *temperature,
                    humidity_pct: *humidity,
                    recorded_at: Utc::now(),
                },
            )?;
            println!("Weather recorded: {condition}, {temperature}°C, {humidity}% humidity");
            Ok(())
        }
        ExecutionCommands::Stats { from, to } => {
            let (from, to) = parse_range(from, to)?;
            let stats = service.statistics(from, to)?;
            println!("Executions: {}", stats.total_executions);
            for (status, count) in &stats.by_status {
                println!("  {status:<14} {count}");
            }
            println!(
                "Portions:   {}/{} delivered",
                stats.total_portions_delivered, stats.total_planned_portions
            );
            println!("Reached:    {} beneficiaries", stats.total_beneficiaries_reached);
            println!(
                "Average progress: {:.0}%",
                stats.average_progress_ratio * 100.0
            );
            Ok(())
        }
    }
}

fn list_executions(executions: &[Execution]) {
    if executions.is_empty() {
        println!("No executions found.");
        return;
    }

    println!(
        "{:<38} {:<16} {:<14} {:<10} {:<7}",
        "ID", "CODE", "STATUS", "PROGRESS", "ISSUES"
    );
    println!("{}", "-".repeat(88));

    for e in executions {
        println!(
            "{:<38} {:<16} {:<14} {:>7.0}%  {:<7}",
            e.execution_id,
            truncate(&e.distribution_code, 14),
            e.status.to_string(),
            e.metrics.progress_ratio * 100.0,
            e.metrics.issues_count,
        );
    }
    println!("\n{} execution(s) total.", executions.len());
}

fn show_status(e: &Execution) {
    println!("Execution: {}", e.execution_id);
    println!("Code:      {}", e.distribution_code);
    println!("Schedule:  {}", e.schedule_id);
    println!("Status:    {}", e.status);
    println!(
        "Portions:  {}/{} delivered",
        e.metrics.total_portions_delivered, e.planned_portions
    );
    println!(
        "Reached:   {}/{} beneficiaries",
        e.metrics.total_beneficiaries_reached, e.planned_beneficiaries
    );
    println!(
        "Deliveries: {} ({} closed)",
        e.metrics.delivery_count, e.metrics.completed_delivery_count
    );
    println!("Issues:    {}", e.metrics.issues_count);
    if let Some(ref started) = e.actual_start_time {
        println!("Started:   {}", started.to_rfc3339());
    }
    if let Some(ref ended) = e.actual_end_time {
        println!("Ended:     {}", ended.to_rfc3339());
    }
    if let Some(ref weather) = e.weather {
        println!(
            "Weather:   {} ({:.1}°C, {:.0}%)",
            weather.condition, weather.temperature_c, weather.humidity_pct
        );
    }
    if let Some(ref reason) = e.cancel_reason {
        println!("Cancelled: {reason}");
    }
    if let Some(ref notes) = e.notes {
        println!("Notes:     {notes}");
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        format!("{}...", &s[..max - 3])
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dt_execution::{DistConfig, FileScheduleProvider, Schedule, ScheduleTarget};
    use tempfile::TempDir;

    fn seeded() -> (TempDir, DistributionService, String) {
        let dir = TempDir::new().unwrap();
        let config = DistConfig::for_data_dir(dir.path());
        let provider = FileScheduleProvider::new(&config.schedules_dir).unwrap();
        let schedule = Schedule::new(
            "DST-2026-0009",
            100,
            vec![ScheduleTarget {
                name: "SDN 04".to_string(),
                address: "Jl. Merdeka 4".to_string(),
                planned_portions: 100,
            }],
        );
        provider.save(&schedule).unwrap();
        let service = DistributionService::open(config).unwrap();
        (dir, service, schedule.schedule_id.to_string())
    }

    #[test]
    fn start_and_cancel_via_commands() {
        let (_dir, service, schedule_id) = seeded();

        execute(
            &ExecutionCommands::Start {
                schedule_id,
                notes: None,
            },
            &service,
            "op",
        )
        .unwrap();

        let executions = service.list_executions(&ExecutionFilter::default()).unwrap();
        assert_eq!(executions.len(), 1);
        let id = executions[0].execution_id.to_string();

        execute(
            &ExecutionCommands::Cancel {
                id: id.clone(),
                reason: "test run".to_string(),
            },
            &service,
            "op",
        )
        .unwrap();

        let execution = service
            .get_execution(uuid::Uuid::parse_str(&id).unwrap())
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
    }

    #[test]
    fn unknown_status_filter_is_an_error() {
        let (_dir, service, _schedule_id) = seeded();
        let result = execute(
            &ExecutionCommands::List {
                status: Some("flying".to_string()),
                search: None,
                with_issues: false,
                from: None,
                to: None,
            },
            &service,
            "op",
        );
        assert!(result.is_err());
    }

    #[test]
    fn date_flags_parse_instants_and_plain_dates() {
        assert_eq!(
            parse_instant("2026-08-24").unwrap().to_rfc3339(),
            "2026-08-24T00:00:00+00:00"
        );
        assert_eq!(
            parse_instant("2026-08-24T06:30:00Z").unwrap().to_rfc3339(),
            "2026-08-24T06:30:00+00:00"
        );
        assert!(parse_instant("last tuesday").is_err());

        let (_dir, service, _schedule_id) = seeded();
        let result = execute(
            &ExecutionCommands::Stats {
                from: Some("not-a-date".to_string()),
                to: None,
            },
            &service,
            "op",
        );
        assert!(result.is_err());
    }
}
