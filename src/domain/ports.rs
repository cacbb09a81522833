//! Domain Ports - Collaborator contracts consumed by the expansion core
//!
//! The expansion engine and dispatcher only talk to the cluster through
//! these traits. `adapters::kube` backs them with the Kubernetes API and
//! `adapters::memory` with an in-process cluster for tests and standalone runs.

use crate::crd::{BlockDevice, StoragePool};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Node Resolution Port
// =============================================================================

/// Resolves a label selector to a single node
#[async_trait]
pub trait NodeResolver: Send + Sync {
    /// Return the one node matching all labels in `selector`.
    ///
    /// Fails with `Error::NodeResolution` carrying `NoMatch` when nothing
    /// matches and `Ambiguous` when several nodes do.
    async fn resolve_node(&self, selector: &BTreeMap<String, String>) -> Result<String>;
}

// =============================================================================
// Pool Store Port
// =============================================================================

/// Access to actual pool resources
#[async_trait]
pub trait PoolStore: Send + Sync {
    /// List pools carrying the ownership label of `topology`
    async fn list_pools(&self, topology: &str) -> Result<Vec<StoragePool>>;

    /// Write `pool` back. Must fail with `Error::Persist { conflict: true, .. }`
    /// when the pool's resourceVersion is stale.
    async fn update_pool(&self, pool: &StoragePool) -> Result<StoragePool>;
}

// =============================================================================
// Device Claim Port
// =============================================================================

/// Device inventory and claim API
#[async_trait]
pub trait DeviceClaimer: Send + Sync {
    /// Fetch a device by name
    async fn get_device(&self, name: &str) -> Result<BlockDevice>;

    /// Claim `device` for `owner`. Succeeds when `owner` already holds the
    /// claim, fails when another owner does.
    async fn claim_device(&self, device: &BlockDevice, owner: &str) -> Result<()>;

    /// Check the claim on `device` makes it usable by `owner`
    async fn is_claim_usable(&self, device: &BlockDevice, owner: &str) -> Result<bool>;
}

// =============================================================================
// Reconcile Control Port
// =============================================================================

/// Suspends and resumes the pool-health reconciliation of a topology's pools
#[async_trait]
pub trait ReconcileControl: Send + Sync {
    /// Ask the health controller to leave the topology's pools alone
    async fn pause(&self, topology: &str) -> Result<()>;

    /// Hand the topology's pools back to the health controller
    async fn resume(&self, topology: &str) -> Result<()>;
}

/// Control that does nothing, for setups without a health controller
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReconcileControl;

#[async_trait]
impl ReconcileControl for NoopReconcileControl {
    async fn pause(&self, _topology: &str) -> Result<()> {
        Ok(())
    }

    async fn resume(&self, _topology: &str) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type NodeResolverRef = Arc<dyn NodeResolver>;
pub type PoolStoreRef = Arc<dyn PoolStore>;
pub type DeviceClaimerRef = Arc<dyn DeviceClaimer>;
pub type ReconcileControlRef = Arc<dyn ReconcileControl>;

/// The full set of collaborators one operations pass needs
#[derive(Clone)]
pub struct ClusterPorts {
    pub nodes: NodeResolverRef,
    pub pools: PoolStoreRef,
    pub devices: DeviceClaimerRef,
    pub control: ReconcileControlRef,
}

impl std::fmt::Debug for ClusterPorts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterPorts").finish_non_exhaustive()
    }
}
