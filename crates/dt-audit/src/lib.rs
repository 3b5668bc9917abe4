//! # dt-audit
//!
//! Append-only audit trail for the distribution tracking engine.
//!
//! Every state mutation in the system — execution lifecycle transitions,
//! delivery transitions, issue reports and resolutions — is recorded as an
//! [`AuditEntry`] in a JSONL (JSON Lines) log file. Each entry carries a
//! before/after snapshot of the mutated record (diffed by the caller, so
//! this crate stays a dumb, trustworthy sink) and links to the previous
//! entry via a SHA-256 hash chain for tamper detection.
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use dt_audit::{AuditTrail, AuditEntry, AuditAction, EntityType};
//!
//! let mut trail = AuditTrail::open("/tmp/audit.jsonl").unwrap();
//! let mut entry = AuditEntry::new(
//!     EntityType::Execution,
//!     uuid::Uuid::new_v4(),
//!     AuditAction::Create,
//!     "operator-7",
//! );
//! trail.record(&mut entry).unwrap();
//! ```

pub mod entry;
pub mod error;
pub mod hasher;
pub mod trail;

// Re-export the main types at the crate root for convenience.
pub use entry::{changed_fields, AuditAction, AuditEntry, EntityType};
pub use error::AuditError;
pub use trail::{AuditFilter, AuditTrail};
