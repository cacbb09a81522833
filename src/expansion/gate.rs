//! Block Device Usability Gate
//!
//! A device may join a raid group only after it has been fetched, claimed
//! for the owning topology, and its claim reported usable. The gate never
//! touches the pool itself.

use crate::domain::ports::DeviceClaimerRef;
use crate::error::{Error, Result};
use tracing::debug;

/// Validates devices for one owning topology
pub struct UsabilityGate {
    devices: DeviceClaimerRef,
    owner: String,
}

impl UsabilityGate {
    /// Create a gate that claims devices on behalf of `owner`
    pub fn new(devices: DeviceClaimerRef, owner: impl Into<String>) -> Self {
        Self {
            devices,
            owner: owner.into(),
        }
    }

    /// Owning topology
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Return Ok only if `device` is fetched, claimed and usable.
    /// Every failure is reported as `Error::DeviceUnusable`.
    pub async fn check(&self, device: &str) -> Result<()> {
        let bd = self
            .devices
            .get_device(device)
            .await
            .map_err(|e| Error::device_unusable(device, format!("could not retrieve device: {}", e)))?;

        self.devices
            .claim_device(&bd, &self.owner)
            .await
            .map_err(|e| Error::device_unusable(device, format!("failed to claim: {}", e)))?;

        let usable = self
            .devices
            .is_claim_usable(&bd, &self.owner)
            .await
            .map_err(|e| {
                Error::device_unusable(device, format!("could not get claim status: {}", e))
            })?;

        if !usable {
            return Err(Error::device_unusable(
                device,
                format!("already claimed, but not by {}", self.owner),
            ));
        }

        debug!(device, owner = %self.owner, "Block device usable");
        Ok(())
    }
}
