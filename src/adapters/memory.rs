//! In-Memory Cluster
//!
//! Implements every port over process-local state. Pools are versioned the
//! way the API server versions them, so a write carrying a stale
//! resourceVersion is rejected as a conflict. Used by tests and by the
//! standalone mode, which loads and saves the state as a YAML fixture.

use crate::crd::{
    BlockDevice, BlockDeviceClaim, BlockDeviceSpec, BlockDeviceStatus, ClaimRef, DeviceState,
    PoolRaidGroup, StoragePool, StoragePoolSpec, TOPOLOGY_LABEL,
};
use crate::domain::ports::{
    ClusterPorts, DeviceClaimer, NodeResolver, NoopReconcileControl, PoolStore,
};
use crate::error::{Error, NodeResolutionFailure, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Fixture Format
// =============================================================================

/// A node and its labels
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Serializable snapshot of an in-memory cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterState {
    #[serde(default)]
    pub nodes: Vec<NodeEntry>,
    #[serde(default)]
    pub pools: Vec<StoragePool>,
    #[serde(default)]
    pub devices: Vec<BlockDevice>,
    #[serde(default)]
    pub claims: Vec<BlockDeviceClaim>,
}

// =============================================================================
// In-Memory Cluster
// =============================================================================

/// Process-local cluster backing all ports
#[derive(Default)]
pub struct InMemoryCluster {
    nodes: RwLock<BTreeMap<String, BTreeMap<String, String>>>,
    pools: DashMap<String, StoragePool>,
    devices: DashMap<String, BlockDevice>,
    /// Claims keyed by device name
    claims: DashMap<String, BlockDeviceClaim>,
    update_calls: AtomicU64,
    fail_next_update: AtomicBool,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cluster from a snapshot
    pub fn from_state(state: ClusterState) -> Self {
        let cluster = Self::new();
        {
            let mut nodes = cluster.nodes.write();
            for node in state.nodes {
                nodes.insert(node.name, node.labels);
            }
        }
        for mut pool in state.pools {
            if pool.metadata.resource_version.is_none() {
                pool.metadata.resource_version = Some("1".to_string());
            }
            cluster.pools.insert(pool.name().to_string(), pool);
        }
        for device in state.devices {
            cluster.devices.insert(device.name().to_string(), device);
        }
        for claim in state.claims {
            cluster
                .claims
                .insert(claim.spec.block_device_name.clone(), claim);
        }
        cluster
    }

    /// Snapshot the current state, sorted by name
    pub fn state(&self) -> ClusterState {
        let mut state = ClusterState {
            nodes: self
                .nodes
                .read()
                .iter()
                .map(|(name, labels)| NodeEntry {
                    name: name.clone(),
                    labels: labels.clone(),
                })
                .collect(),
            pools: self.pools.iter().map(|p| p.value().clone()).collect(),
            devices: self.devices.iter().map(|d| d.value().clone()).collect(),
            claims: self.claims.iter().map(|c| c.value().clone()).collect(),
        };
        state.pools.sort_by(|a, b| a.name().cmp(b.name()));
        state.devices.sort_by(|a, b| a.name().cmp(b.name()));
        state
            .claims
            .sort_by(|a, b| a.spec.block_device_name.cmp(&b.spec.block_device_name));
        state
    }

    /// Load a cluster from a YAML fixture
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let state: ClusterState = serde_yaml::from_str(&raw)?;
        Ok(Self::from_state(state))
    }

    /// Write the current state as a YAML fixture
    pub fn save_yaml(&self, path: impl AsRef<Path>) -> Result<()> {
        let raw = serde_yaml::to_string(&self.state())?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Ports backed by this cluster, without a pool-health controller to pause
    pub fn ports(self: &Arc<Self>) -> ClusterPorts {
        ClusterPorts {
            nodes: self.clone(),
            pools: self.clone(),
            devices: self.clone(),
            control: Arc::new(NoopReconcileControl),
        }
    }

    // =========================================================================
    // Seeding
    // =========================================================================

    pub fn add_node(&self, name: &str, labels: BTreeMap<String, String>) {
        self.nodes.write().insert(name.to_string(), labels);
    }

    /// Add a pool on `node` owned by `topology`
    pub fn add_pool(&self, name: &str, node: &str, topology: &str, groups: Vec<PoolRaidGroup>) {
        let mut pool = StoragePool::new(
            name,
            StoragePoolSpec {
                node_name: node.to_string(),
                raid_groups: groups,
                ..Default::default()
            },
        );
        pool.metadata.labels = Some(
            [(TOPOLOGY_LABEL.to_string(), topology.to_string())]
                .into_iter()
                .collect(),
        );
        pool.metadata.resource_version = Some("1".to_string());
        self.pools.insert(name.to_string(), pool);
    }

    /// Add an active, unclaimed device on `node`
    pub fn add_device(&self, name: &str, node: &str) {
        let mut device = BlockDevice::new(
            name,
            BlockDeviceSpec {
                node_name: node.to_string(),
                path: format!("/dev/{}", name),
                ..Default::default()
            },
        );
        device.status = Some(BlockDeviceStatus {
            state: DeviceState::Active,
        });
        self.devices.insert(name.to_string(), device);
    }

    /// Record a claim of `device` by `owner` and bind the device to it
    pub fn add_claim(&self, device: &str, owner: &str) {
        let claim = BlockDeviceClaim::for_device(device, owner);
        self.bind_device(device, &BlockDeviceClaim::name_for(device));
        self.claims.insert(device.to_string(), claim);
    }

    /// Point a device's claim reference at `claim`
    pub fn bind_device(&self, device: &str, claim: &str) {
        if let Some(mut bd) = self.devices.get_mut(device) {
            bd.spec.claim_ref = Some(ClaimRef {
                name: claim.to_string(),
            });
        }
    }

    /// Set a device's presence state
    pub fn set_device_state(&self, device: &str, state: DeviceState) {
        if let Some(mut bd) = self.devices.get_mut(device) {
            bd.status = Some(BlockDeviceStatus { state });
        }
    }

    /// Reject the next pool update as a resourceVersion conflict
    pub fn fail_next_update_with_conflict(&self) {
        self.fail_next_update.store(true, Ordering::SeqCst);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn pool(&self, name: &str) -> Option<StoragePool> {
        self.pools.get(name).map(|p| p.value().clone())
    }

    pub fn claim_owner(&self, device: &str) -> Option<String> {
        self.claims.get(device).map(|c| c.owner().to_string())
    }

    /// Number of update calls received, including rejected ones
    pub fn update_count(&self) -> u64 {
        self.update_calls.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Port Implementations
// =============================================================================

#[async_trait]
impl NodeResolver for InMemoryCluster {
    async fn resolve_node(&self, selector: &BTreeMap<String, String>) -> Result<String> {
        let nodes = self.nodes.read();
        let matches: Vec<&String> = nodes
            .iter()
            .filter(|(_, labels)| selector.iter().all(|(k, v)| labels.get(k) == Some(v)))
            .map(|(name, _)| name)
            .collect();

        match matches.as_slice() {
            [node] => Ok((*node).clone()),
            [] => Err(Error::NodeResolution {
                selector: crate::crd::selector_string(selector),
                failure: NodeResolutionFailure::NoMatch,
            }),
            many => Err(Error::NodeResolution {
                selector: crate::crd::selector_string(selector),
                failure: NodeResolutionFailure::Ambiguous(many.len()),
            }),
        }
    }
}

#[async_trait]
impl PoolStore for InMemoryCluster {
    async fn list_pools(&self, topology: &str) -> Result<Vec<StoragePool>> {
        let mut pools: Vec<StoragePool> = self
            .pools
            .iter()
            .filter(|p| p.topology() == Some(topology))
            .map(|p| p.value().clone())
            .collect();
        pools.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(pools)
    }

    async fn update_pool(&self, pool: &StoragePool) -> Result<StoragePool> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let name = pool.name().to_string();

        let conflict = |reason: &str| Error::Persist {
            pool: name.clone(),
            reason: reason.to_string(),
            conflict: true,
        };

        if self.fail_next_update.swap(false, Ordering::SeqCst) {
            return Err(conflict("the object has been modified"));
        }

        let mut stored = self.pools.get_mut(&name).ok_or_else(|| Error::ResourceNotFound {
            kind: "StoragePool".to_string(),
            name: name.clone(),
        })?;

        if stored.metadata.resource_version != pool.metadata.resource_version {
            return Err(conflict("the object has been modified"));
        }

        let next = stored
            .metadata
            .resource_version
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;

        let mut updated = pool.clone();
        updated.metadata.resource_version = Some(next.to_string());
        *stored = updated.clone();
        debug!(pool = %name, resource_version = next, "Updated pool");
        Ok(updated)
    }
}

#[async_trait]
impl DeviceClaimer for InMemoryCluster {
    async fn get_device(&self, name: &str) -> Result<BlockDevice> {
        self.devices
            .get(name)
            .map(|d| d.value().clone())
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "BlockDevice".to_string(),
                name: name.to_string(),
            })
    }

    async fn claim_device(&self, device: &BlockDevice, owner: &str) -> Result<()> {
        let name = device.name().to_string();
        match self.claims.entry(name.clone()) {
            Entry::Occupied(existing) => {
                if existing.get().owner() == owner {
                    Ok(())
                } else {
                    Err(Error::device_unusable(
                        name,
                        format!("claimed by {}", existing.get().owner()),
                    ))
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(BlockDeviceClaim::for_device(&name, owner));
                // The inventory agent binds unbound devices to new claims
                if let Some(mut bd) = self.devices.get_mut(&name) {
                    if bd.spec.claim_ref.is_none() {
                        bd.spec.claim_ref = Some(ClaimRef {
                            name: BlockDeviceClaim::name_for(&name),
                        });
                    }
                }
                Ok(())
            }
        }
    }

    async fn is_claim_usable(&self, device: &BlockDevice, owner: &str) -> Result<bool> {
        let name = device.name();
        let claim = self
            .claims
            .get(name)
            .map(|c| c.value().clone())
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "BlockDeviceClaim".to_string(),
                name: BlockDeviceClaim::name_for(name),
            })?;
        let current = self.get_device(name).await?;
        Ok(current.is_usable_under(&claim, owner))
    }
}
