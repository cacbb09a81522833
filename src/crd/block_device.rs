//! BlockDevice and BlockDeviceClaim CRDs
//!
//! Devices are discovered and reported by the node inventory agent; this
//! operator only reads them and records exclusive claims against them.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::TOPOLOGY_LABEL;

// =============================================================================
// BlockDevice CRD
// =============================================================================

/// A block device reported by a node
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "topology.storage.io",
    version = "v1alpha1",
    kind = "BlockDevice",
    plural = "blockdevices",
    shortname = "bd",
    namespaced,
    status = "BlockDeviceStatus",
    printcolumn = r#"{"name": "Node", "type": "string", "jsonPath": ".spec.nodeName"}"#,
    printcolumn = r#"{"name": "Path", "type": "string", "jsonPath": ".spec.path"}"#,
    printcolumn = r#"{"name": "State", "type": "string", "jsonPath": ".status.state"}"#,
    printcolumn = r#"{"name": "Claim", "type": "string", "jsonPath": ".spec.claimRef.name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceSpec {
    /// Node the device is attached to
    pub node_name: String,

    /// Device path (e.g., /dev/sdb)
    #[serde(default)]
    pub path: String,

    /// Capacity in bytes
    #[serde(default)]
    pub capacity_bytes: u64,

    /// Claim the device is bound to, set by the inventory agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_ref: Option<ClaimRef>,
}

/// Reference from a device to the claim bound to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRef {
    /// BlockDeviceClaim name
    pub name: String,
}

/// Status of a BlockDevice
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceStatus {
    /// Whether the device is currently present on its node
    #[serde(default)]
    pub state: DeviceState,
}

/// Presence state of a device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum DeviceState {
    #[default]
    Unknown,
    Active,
    Inactive,
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceState::Unknown => write!(f, "Unknown"),
            DeviceState::Active => write!(f, "Active"),
            DeviceState::Inactive => write!(f, "Inactive"),
        }
    }
}

impl BlockDevice {
    /// Get the device name
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    /// Current presence state
    pub fn state(&self) -> DeviceState {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }

    /// Check if `claim` makes this device usable by `owner`: the claim
    /// belongs to `owner`, the device is not bound to a different claim,
    /// and the device has not gone inactive.
    pub fn is_usable_under(&self, claim: &BlockDeviceClaim, owner: &str) -> bool {
        if claim.owner() != owner || claim.spec.block_device_name != self.name() {
            return false;
        }
        let bound_elsewhere = self
            .spec
            .claim_ref
            .as_ref()
            .map(|r| Some(r.name.as_str()) != claim.metadata.name.as_deref())
            .unwrap_or(false);
        !bound_elsewhere && self.state() != DeviceState::Inactive
    }
}

// =============================================================================
// BlockDeviceClaim CRD
// =============================================================================

/// An exclusive claim of one device by one topology
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "topology.storage.io",
    version = "v1alpha1",
    kind = "BlockDeviceClaim",
    plural = "blockdeviceclaims",
    shortname = "bdc",
    namespaced,
    printcolumn = r#"{"name": "Device", "type": "string", "jsonPath": ".spec.blockDeviceName"}"#,
    printcolumn = r#"{"name": "Owner", "type": "string", "jsonPath": ".spec.owner"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceClaimSpec {
    /// Claimed device
    pub block_device_name: String,

    /// Topology holding the claim
    pub owner: String,
}

impl BlockDeviceClaim {
    /// Deterministic claim name for a device, so two claimants collide on create
    pub fn name_for(device: &str) -> String {
        format!("bdc-{}", device)
    }

    /// Build the claim `owner` would hold on `device`
    pub fn for_device(device: &str, owner: &str) -> Self {
        let mut claim = BlockDeviceClaim::new(
            &Self::name_for(device),
            BlockDeviceClaimSpec {
                block_device_name: device.to_string(),
                owner: owner.to_string(),
            },
        );
        claim.metadata.labels = Some(
            [(TOPOLOGY_LABEL.to_string(), owner.to_string())]
                .into_iter()
                .collect(),
        );
        claim
    }

    /// Owning topology
    pub fn owner(&self) -> &str {
        &self.spec.owner
    }
}
