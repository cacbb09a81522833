//! Custom Resource Definitions for the Pool Topology Operator
//!
//! This module contains all CRD types:
//! - PoolTopology: desired raid-group layout of pools across nodes
//! - StoragePool: the live pool bound to one node
//! - BlockDevice / BlockDeviceClaim: device inventory and exclusive claims

pub mod block_device;
pub mod pool_topology;
pub mod raid;
pub mod storage_pool;

pub use block_device::*;
pub use pool_topology::*;
pub use raid::*;
pub use storage_pool::*;

/// API group shared by all resources of this operator
pub const API_GROUP: &str = "topology.storage.io";

/// Label carrying the name of the topology that owns a pool or claim
pub const TOPOLOGY_LABEL: &str = "topology.storage.io/pool-topology";

/// Annotation holding the operation lease of a pool
pub const LEASE_ANNOTATION: &str = "topology.storage.io/operation-lease";

/// Render a label map as a Kubernetes label selector string
pub fn selector_string(labels: &std::collections::BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}
