//! Pool Topology Operator
//!
//! A Kubernetes operator running day-2 operations on raid-group storage
//! pools. A `PoolTopology` describes the desired raid groups of a pool on
//! each node; the operator grows the live `StoragePool` resources towards it
//! without ever removing a device.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                 PoolTopology Controller (kube-rs)                 │
//! ├───────────────────────────────────────────────────────────────────┤
//! │                      Operation Dispatcher                         │
//! │        pause ──► expand ──► replace (unsupported) ──► resume      │
//! ├──────────────────────────────┬────────────────────────────────────┤
//! │      Pool Expansion Engine   │       Block Device Usability Gate  │
//! │  new groups / striped growth │     fetch ──► claim ──► usable?    │
//! ├──────────────────────────────┴────────────────────────────────────┤
//! │  Ports: NodeResolver · PoolStore · DeviceClaimer · ReconcileControl│
//! ├───────────────────────────────────────────────────────────────────┤
//! │          Kubernetes adapters      │     In-memory cluster         │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`expansion`]: Membership test, group delta, usability gate and the engine
//! - [`controlplane`]: Dispatcher, lease control, controller and REST API
//! - [`adapters`]: Kubernetes and in-memory implementations of the ports
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Port traits
//! - [`config`]: Operator configuration
//! - [`metrics`]: Prometheus metrics
//! - [`error`]: Error types and handling

pub mod adapters;
pub mod config;
pub mod controlplane;
pub mod crd;
pub mod domain;
pub mod error;
pub mod expansion;
pub mod metrics;

// Re-export commonly used types
pub use adapters::{ClusterState, InMemoryCluster, KubeCluster};

pub use config::OperatorConfig;

pub use controlplane::{
    ApiServer, ApiServerConfig, Context, OperationDispatcher, PoolLeaseControl, ReportStore,
};

pub use crd::{
    BlockDevice, BlockDeviceClaim, PoolSpec, PoolTopology, PoolTopologySpec, PoolTopologyStatus,
    RaidGroupSpec, RaidType, StoragePool, StoragePoolSpec,
};

pub use domain::ports::{
    ClusterPorts, DeviceClaimer, NodeResolver, NoopReconcileControl, PoolStore, ReconcileControl,
};

pub use error::{Error, ErrorAction, Result};

pub use expansion::{ExpansionReport, PoolExpander, ReportSummary, UsabilityGate};

pub use metrics::OperatorMetrics;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
