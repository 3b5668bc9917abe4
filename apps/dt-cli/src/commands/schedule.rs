// schedule.rs — Schedule subcommands for the file-backed provider: seed,
// list, show.

use std::path::PathBuf;

use clap::Subcommand;
use dt_execution::{DistConfig, FileScheduleProvider, Schedule, ScheduleProvider};

#[derive(Subcommand)]
pub enum ScheduleCommands {
    /// Seed a schedule from a JSON file (or generate a blank template).
    Seed {
        /// Path to a schedule JSON file.
        file: PathBuf,
    },
    /// List all schedules.
    List,
    /// Show one schedule with its targets.
    Show {
        /// Schedule ID.
        id: String,
    },
}

pub fn execute(cmd: &ScheduleCommands, config: &DistConfig) -> anyhow::Result<()> {
    let provider = FileScheduleProvider::new(&config.schedules_dir)?;

    match cmd {
        ScheduleCommands::Seed { file } => {
            let json = std::fs::read_to_string(file)?;
            let schedule: Schedule = serde_json::from_str(&json)?;
            provider.save(&schedule)?;
            println!(
                "Seeded schedule {} ({}, {} target(s), {} portions)",
                schedule.schedule_id,
                schedule.distribution_code,
                schedule.targets.len(),
                schedule.planned_portions
            );
            Ok(())
        }
        ScheduleCommands::List => {
            let schedules = provider.list()?;
            if schedules.is_empty() {
                println!("No schedules found.");
                return Ok(());
            }

            println!(
                "{:<38} {:<16} {:<12} {:>8} {:>8}",
                "ID", "CODE", "STATUS", "TARGETS", "PORTIONS"
            );
            println!("{}", "-".repeat(88));
            for s in &schedules {
                println!(
                    "{:<38} {:<16} {:<12} {:>8} {:>8}",
                    s.schedule_id,
                    s.distribution_code,
                    format!("{:?}", s.status).to_lowercase(),
                    s.targets.len(),
                    s.planned_portions,
                );
            }
            println!("\n{} schedule(s) total.", schedules.len());
            Ok(())
        }
        ScheduleCommands::Show { id } => {
            let schedule = provider.fetch(uuid::Uuid::parse_str(id)?)?;
            println!("Schedule: {}", schedule.schedule_id);
            println!("Code:     {}", schedule.distribution_code);
            println!("Status:   {:?}", schedule.status);
            println!("Date:     {}", schedule.distribution_date.to_rfc3339());
            println!(
                "Planned:  {} portions, {} beneficiaries",
                schedule.planned_portions, schedule.planned_beneficiaries
            );
            println!("Targets:");
            for t in &schedule.targets {
                println!(
                    "  {:<24} {:>5} portions   {}",
                    t.name, t.planned_portions, t.address
                );
            }
            Ok(())
        }
    }
}
