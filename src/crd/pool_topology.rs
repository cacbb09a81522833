//! PoolTopology CRD
//!
//! The desired description of how raid-group pools are laid out across
//! nodes. Each pool spec selects one node and lists the raid groups the
//! pool on that node should eventually contain.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::raid::{BlockDeviceRef, RaidType};

// =============================================================================
// PoolTopology CRD
// =============================================================================

/// PoolTopology declares the raid groups each node's pool should carry.
/// The operator only ever adds to existing pools to converge on it.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "topology.storage.io",
    version = "v1alpha1",
    kind = "PoolTopology",
    plural = "pooltopologies",
    shortname = "ptop",
    namespaced,
    status = "PoolTopologyStatus",
    printcolumn = r#"{"name": "Pools", "type": "integer", "jsonPath": ".status.desiredPools"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "LastOperation", "type": "date", "jsonPath": ".status.lastOperationTime"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PoolTopologySpec {
    /// Desired pools, one per node
    #[serde(default)]
    pub pools: Vec<PoolSpec>,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// Desired configuration of the pool on one node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolSpec {
    /// Labels that must select exactly one node
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,

    /// Pool-wide settings
    #[serde(default)]
    pub pool_config: PoolConfig,

    /// Raid groups in order
    #[serde(default)]
    pub raid_groups: Vec<RaidGroupSpec>,
}

/// Pool-wide settings of a pool spec
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    /// Raid type used by groups that do not set one
    #[serde(default)]
    pub default_raid_group_type: RaidType,
}

/// A desired raid group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RaidGroupSpec {
    /// Stable group identity, stamped onto the pool when the group is created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Raid type; falls back to the pool default
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub raid_type: Option<RaidType>,

    /// Member devices
    #[serde(default)]
    pub block_devices: Vec<BlockDeviceRef>,
}

impl RaidGroupSpec {
    /// Device names in declaration order
    pub fn device_names(&self) -> impl Iterator<Item = &str> {
        self.block_devices.iter().map(|bd| bd.block_device_name.as_str())
    }

    /// Raid type after applying the pool default
    pub fn resolved_type(&self, pool_config: &PoolConfig) -> RaidType {
        self.raid_type.unwrap_or(pool_config.default_raid_group_type)
    }
}

impl PoolSpec {
    /// Raid type of `group` under this pool's current default
    pub fn group_type(&self, group: &RaidGroupSpec) -> RaidType {
        group.resolved_type(&self.pool_config)
    }
}

// =============================================================================
// Status
// =============================================================================

/// Status of the PoolTopology
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolTopologyStatus {
    /// Current phase
    #[serde(default)]
    pub phase: TopologyPhase,

    /// Number of pool specs in the topology
    #[serde(default)]
    pub desired_pools: u32,

    /// Time the last day-2 operation pass finished
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_operation_time: Option<DateTime<Utc>>,

    /// Per pool spec outcome of the last pass
    #[serde(default)]
    pub pools: Vec<PoolOperationStatus>,

    /// Conditions
    #[serde(default)]
    pub conditions: Vec<TopologyCondition>,
}

/// Topology lifecycle phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum TopologyPhase {
    #[default]
    Pending,
    /// The last pass mutated at least one pool
    Expanding,
    /// The last pass found nothing to do
    Realized,
    /// The last pass failed for at least one pool spec
    Degraded,
}

impl std::fmt::Display for TopologyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyPhase::Pending => write!(f, "Pending"),
            TopologyPhase::Expanding => write!(f, "Expanding"),
            TopologyPhase::Realized => write!(f, "Realized"),
            TopologyPhase::Degraded => write!(f, "Degraded"),
        }
    }
}

/// Outcome of one pool spec in the last pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolOperationStatus {
    /// Index of the pool spec in the topology
    pub index: u32,

    /// Resolved node, when resolution succeeded
    #[serde(default)]
    pub node: Option<String>,

    /// Pool resource name, when lookup succeeded
    #[serde(default)]
    pub pool: Option<String>,

    /// Outcome: Expanded, Unchanged or the error kind
    pub outcome: String,

    /// Human-readable detail
    #[serde(default)]
    pub message: Option<String>,
}

/// Topology condition
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopologyCondition {
    /// Type of condition
    pub r#type: String,
    /// Status: True, False, Unknown
    pub status: String,
    /// Last transition time
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<DateTime<Utc>>,
    /// Reason
    #[serde(default)]
    pub reason: Option<String>,
    /// Message
    #[serde(default)]
    pub message: Option<String>,
}

// =============================================================================
// Implementations
// =============================================================================

impl PoolTopology {
    /// Get the topology name
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    /// Get the topology namespace
    pub fn namespace_or_default(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }
}

impl PoolTopologyStatus {
    /// Set a condition, replacing one of the same type.
    /// The transition time is kept when the status value does not change.
    pub fn set_condition(&mut self, mut condition: TopologyCondition) {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
    }
}
