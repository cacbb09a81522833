//! Raid group types shared by desired and actual pool resources

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Redundancy scheme of a raid group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RaidType {
    #[default]
    Striped,
    Mirror,
    Raidz,
    Raidz2,
}

impl RaidType {
    /// Smallest number of devices a group of this type can be built from
    pub fn min_devices(&self) -> usize {
        match self {
            RaidType::Striped => 1,
            RaidType::Mirror => 2,
            RaidType::Raidz => 3,
            RaidType::Raidz2 => 6,
        }
    }

    /// Only striped groups may be widened in place
    pub fn is_growable(&self) -> bool {
        matches!(self, RaidType::Striped)
    }
}

impl std::fmt::Display for RaidType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaidType::Striped => write!(f, "striped"),
            RaidType::Mirror => write!(f, "mirror"),
            RaidType::Raidz => write!(f, "raidz"),
            RaidType::Raidz2 => write!(f, "raidz2"),
        }
    }
}

impl std::str::FromStr for RaidType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "striped" | "stripe" => Ok(RaidType::Striped),
            "mirror" | "mirrored" => Ok(RaidType::Mirror),
            "raidz" | "raidz1" => Ok(RaidType::Raidz),
            "raidz2" => Ok(RaidType::Raidz2),
            other => Err(Error::InvalidPoolSpec(format!("unknown raid type: {}", other))),
        }
    }
}

/// Reference to a block device by resource name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceRef {
    /// Name of the BlockDevice resource
    pub block_device_name: String,
}

impl BlockDeviceRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            block_device_name: name.into(),
        }
    }
}

impl From<&str> for BlockDeviceRef {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
