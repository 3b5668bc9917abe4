//! # dt-issue
//!
//! Issue reporting and resolution for distribution executions.
//!
//! An [`Issue`] records a problem observed during a run (vehicle
//! breakdown, food quality, access problems) against the owning execution
//! and optionally specific deliveries. The [`IssueTracker`] persists
//! issues, keeps the execution's `issues_count` metric in sync by
//! recounting, and records every report and resolution on the shared
//! audit chain.

pub mod error;
pub mod issue;
pub mod tracker;

pub use error::IssueError;
pub use issue::{Issue, IssueLocation, IssueSeverity, IssueType, Resolution};
pub use tracker::{IssueFilter, IssueSummary, IssueTracker};
