// mod.rs — CLI command modules.

pub mod audit;
pub mod delivery;
pub mod execution;
pub mod issue;
pub mod schedule;
pub mod serve;
