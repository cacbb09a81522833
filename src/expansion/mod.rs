//! Expansion Module
//!
//! Add-only pool expansion:
//! - Usability gate for block devices
//! - Raid group membership and delta computation
//! - The expansion engine and its per-pool outcomes

pub mod engine;
pub mod gate;
pub mod membership;
pub mod report;

pub use engine::PoolExpander;
pub use gate::UsabilityGate;
pub use membership::{added_devices, is_raid_group_present, matching_group, validate_pool_spec};
pub use report::{
    AddedGroup, ExpansionReport, GrownGroup, PoolChange, PoolOutcome, PoolSummary, RejectedDevice,
    ReportSummary,
};
