//! Control Plane Module
//!
//! Everything around the expansion core that runs it against a cluster:
//! - Operation dispatcher and lease-based reconcile control
//! - PoolTopology controller with per-topology backoff
//! - Report store and the REST API serving it

pub mod api;
pub mod controller;
pub mod dispatcher;
pub mod lease;
pub mod reports;

pub use api::{ApiServer, ApiServerConfig};
pub use controller::{Context, RequeuePolicy};
pub use dispatcher::OperationDispatcher;
pub use lease::PoolLeaseControl;
pub use reports::{ReportStore, StoredReport};
