//! StoragePool CRD
//!
//! The live pool on a single node. Created by the provisioning path,
//! widened by this operator's expansion pass, never deleted by it.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::pool_topology::PoolConfig;
use super::raid::{BlockDeviceRef, RaidType};
use super::{LEASE_ANNOTATION, TOPOLOGY_LABEL};

// =============================================================================
// StoragePool CRD
// =============================================================================

/// StoragePool is the actual pool bound to one node.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "topology.storage.io",
    version = "v1alpha1",
    kind = "StoragePool",
    plural = "storagepools",
    shortname = "spool",
    namespaced,
    status = "StoragePoolStatus",
    printcolumn = r#"{"name": "Node", "type": "string", "jsonPath": ".spec.nodeName"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StoragePoolSpec {
    /// Node the pool runs on
    pub node_name: String,

    /// Pool-wide settings copied from the topology at creation
    #[serde(default)]
    pub pool_config: PoolConfig,

    /// Raid groups currently making up the pool
    #[serde(default)]
    pub raid_groups: Vec<PoolRaidGroup>,
}

/// A raid group that exists on the pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolRaidGroup {
    /// Group identity; absent on groups created before names existed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Redundancy scheme
    #[serde(rename = "type")]
    pub raid_type: RaidType,

    /// Member devices
    #[serde(default)]
    pub block_devices: Vec<BlockDeviceRef>,
}

impl PoolRaidGroup {
    /// Device names in pool order
    pub fn device_names(&self) -> impl Iterator<Item = &str> {
        self.block_devices.iter().map(|bd| bd.block_device_name.as_str())
    }
}

// =============================================================================
// Status
// =============================================================================

/// Status of the StoragePool, written by the pool-health controller
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoragePoolStatus {
    /// Current phase
    #[serde(default)]
    pub phase: StoragePoolPhase,

    /// Last health reconcile time
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_reconcile_time: Option<DateTime<Utc>>,
}

/// Pool lifecycle phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum StoragePoolPhase {
    #[default]
    Pending,
    Online,
    Degraded,
    Offline,
}

impl std::fmt::Display for StoragePoolPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoragePoolPhase::Pending => write!(f, "Pending"),
            StoragePoolPhase::Online => write!(f, "Online"),
            StoragePoolPhase::Degraded => write!(f, "Degraded"),
            StoragePoolPhase::Offline => write!(f, "Offline"),
        }
    }
}

// =============================================================================
// Operation Lease
// =============================================================================

/// Marker placed on a pool while day-2 operations own it.
/// The pool-health controller skips leased pools until the lease is
/// released or has expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationLease {
    /// Identity of the lease holder
    pub holder: String,
    /// When the lease was taken
    pub acquired_at: DateTime<Utc>,
}

impl OperationLease {
    pub fn new(holder: impl Into<String>) -> Self {
        Self {
            holder: holder.into(),
            acquired_at: Utc::now(),
        }
    }

    /// Check if the lease is older than `ttl_secs`
    pub fn is_expired(&self, ttl_secs: u64) -> bool {
        let age = Utc::now().signed_duration_since(self.acquired_at);
        age.num_seconds() > ttl_secs as i64
    }
}

// =============================================================================
// Implementations
// =============================================================================

impl StoragePool {
    /// Get the pool name
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    /// Node the pool is bound to
    pub fn node_name(&self) -> &str {
        &self.spec.node_name
    }

    /// Topology that owns this pool, from its label
    pub fn topology(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(TOPOLOGY_LABEL))
            .map(String::as_str)
    }

    /// Every device name on the pool, across all groups
    pub fn device_names(&self) -> HashSet<&str> {
        self.spec
            .raid_groups
            .iter()
            .flat_map(|g| g.device_names())
            .collect()
    }

    /// Total device count across groups
    pub fn device_count(&self) -> usize {
        self.spec.raid_groups.iter().map(|g| g.block_devices.len()).sum()
    }

    /// Current operation lease, if any. An unparsable annotation reads as no lease.
    pub fn operation_lease(&self) -> Option<OperationLease> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(LEASE_ANNOTATION))
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    /// Place `lease` on the pool
    pub fn set_operation_lease(&mut self, lease: &OperationLease) -> crate::error::Result<()> {
        let raw = serde_json::to_string(lease)?;
        self.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(LEASE_ANNOTATION.to_string(), raw);
        Ok(())
    }

    /// Remove the lease annotation; returns whether one was present
    pub fn clear_operation_lease(&mut self) -> bool {
        self.metadata
            .annotations
            .as_mut()
            .map(|a| a.remove(LEASE_ANNOTATION).is_some())
            .unwrap_or(false)
    }

    /// Check if a live lease held by someone other than `holder` exists
    pub fn is_leased_by_other(&self, holder: &str, ttl_secs: u64) -> bool {
        self.operation_lease()
            .map(|l| l.holder != holder && !l.is_expired(ttl_secs))
            .unwrap_or(false)
    }
}
