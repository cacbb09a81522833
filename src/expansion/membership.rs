//! Raid group membership and delta computation
//!
//! A desired group is "present" on a pool when any one of its devices is
//! already on the pool, in any group. This is a device-overlap test, not a
//! group identity test: a desired group sharing a single device with an
//! unrelated group is classified as present. Named groups narrow which
//! actual group a present desired group is paired with, but never change
//! presence, so a device is never placed on a pool twice.

use std::collections::HashSet;

use crate::crd::{PoolRaidGroup, PoolSpec, RaidGroupSpec, StoragePool};
use crate::error::{Error, Result};

/// Check if any device of `group` is already on `pool`
pub fn is_raid_group_present(group: &RaidGroupSpec, pool: &StoragePool) -> bool {
    let wanted: HashSet<&str> = group.device_names().collect();
    pool.spec
        .raid_groups
        .iter()
        .flat_map(|g| g.device_names())
        .any(|name| wanted.contains(name))
}

/// Devices of `desired` missing from `actual`, in desired order
pub fn added_devices(desired: &RaidGroupSpec, actual: &PoolRaidGroup) -> Vec<String> {
    let on_pool: HashSet<&str> = actual.device_names().collect();
    desired
        .device_names()
        .filter(|name| !on_pool.contains(name))
        .map(str::to_string)
        .collect()
}

/// Find the actual group that `desired` (at position `index` in its pool
/// spec) corresponds to.
///
/// Resolution order: a group with the same name; the group at the same
/// index when it shares a device; the first group sharing a device.
pub fn matching_group(desired: &RaidGroupSpec, index: usize, pool: &StoragePool) -> Option<usize> {
    let groups = &pool.spec.raid_groups;

    if let Some(name) = desired.name.as_deref() {
        if let Some(pos) = groups.iter().position(|g| g.name.as_deref() == Some(name)) {
            return Some(pos);
        }
    }

    let wanted: HashSet<&str> = desired.device_names().collect();
    let overlaps = |g: &PoolRaidGroup| g.device_names().any(|name| wanted.contains(name));

    if groups.get(index).map(overlaps).unwrap_or(false) {
        return Some(index);
    }

    groups.iter().position(overlaps)
}

/// Reject pool specs no expansion can be derived from: empty groups and
/// devices listed more than once across the spec.
pub fn validate_pool_spec(spec: &PoolSpec) -> Result<()> {
    let mut seen = HashSet::new();
    for (idx, group) in spec.raid_groups.iter().enumerate() {
        if group.block_devices.is_empty() {
            return Err(Error::InvalidPoolSpec(format!(
                "raid group {} has no block devices",
                idx
            )));
        }
        for name in group.device_names() {
            if !seen.insert(name) {
                return Err(Error::InvalidPoolSpec(format!(
                    "block device {} is listed more than once",
                    name
                )));
            }
        }
    }
    Ok(())
}
