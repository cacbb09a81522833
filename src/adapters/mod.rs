//! Adapters Module
//!
//! Implementations of the domain ports:
//! - `kube`: the Kubernetes API server
//! - `memory`: an in-process cluster for tests and standalone runs

pub mod kube;
pub mod memory;

pub use self::kube::KubeCluster;
pub use self::memory::{ClusterState, InMemoryCluster, NodeEntry};
