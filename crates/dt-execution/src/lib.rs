//! # dt-execution
//!
//! Distribution execution lifecycle and delivery tracking engine.
//!
//! An [`Execution`] is one concrete run of a distribution schedule: the
//! moment a schedule is activated, the engine creates the execution plus
//! one [`Delivery`] per target site, then drives each delivery through its
//! lifecycle (depart, track, arrive, complete or fail). Execution-level
//! aggregate metrics are derived from the owned deliveries by the
//! [`aggregate`] module after every quantity-changing transition, and every
//! mutation is recorded in the `dt-audit` trail.
//!
//! All orchestration goes through [`DistributionService`], which owns the
//! stores, the per-execution locks, and the audit handle.

pub mod aggregate;
pub mod config;
pub mod delivery;
pub mod error;
pub mod execution;
pub mod schedule;
pub mod service;
pub mod store;

pub use config::DistConfig;
pub use delivery::{
    Delivery, DeliveryStatus, Photo, PhotoType, QualityCheck, Signature, TrackingPoint,
};
pub use error::ExecutionError;
pub use execution::{Execution, ExecutionMetrics, ExecutionStatus, Weather};
pub use schedule::{FileScheduleProvider, Schedule, ScheduleProvider, ScheduleStatus, ScheduleTarget};
pub use service::{
    CompleteDeliveryRequest, DistributionService, ExecutionFilter, ExecutionLocks,
    ExecutionStatistics, ProgressUpdate,
};
pub use store::{DeliveryStore, ExecutionStore};
