//! Expansion outcomes
//!
//! Every pool spec yields one `PoolOutcome`; device and group level
//! rejections are carried inside the outcome instead of failing the pass.

use serde::{Deserialize, Serialize};

use crate::crd::{PoolOperationStatus, RaidType};
use crate::error::Error;

/// A device the gate turned away during a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedDevice {
    pub device: String,
    pub reason: String,
}

/// A raid group appended to the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedGroup {
    pub name: Option<String>,
    pub raid_type: RaidType,
    pub devices: Vec<String>,
}

/// Devices appended to an existing striped group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrownGroup {
    /// Index of the group on the pool
    pub group_index: usize,
    pub devices: Vec<String>,
}

/// What a pass did to one pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolChange {
    pub added_groups: Vec<AddedGroup>,
    pub grown_groups: Vec<GrownGroup>,
    pub rejected_devices: Vec<RejectedDevice>,
    /// Groups skipped because they are narrower than their raid type allows
    pub skipped_groups: Vec<String>,
}

impl PoolChange {
    /// Check if the pool was mutated
    pub fn is_mutation(&self) -> bool {
        !self.added_groups.is_empty() || !self.grown_groups.is_empty()
    }

    /// Number of devices added by this change
    pub fn devices_added(&self) -> usize {
        self.added_groups.iter().map(|g| g.devices.len()).sum::<usize>()
            + self.grown_groups.iter().map(|g| g.devices.len()).sum::<usize>()
    }
}

/// Outcome of one pool spec
#[derive(Debug)]
pub struct PoolOutcome {
    /// Position of the pool spec in the topology
    pub index: usize,
    /// Resolved node
    pub node: Option<String>,
    /// Pool resource name
    pub pool: Option<String>,
    /// Change computed for the pool, even when persisting it failed
    pub change: PoolChange,
    /// Pool-spec level failure, including persist failures
    pub error: Option<Error>,
}

impl PoolOutcome {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            node: None,
            pool: None,
            change: PoolChange::default(),
            error: None,
        }
    }

    /// Check if the pool spec completed without a pool-spec level error
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Status entry for the topology resource
    pub fn to_status(&self) -> PoolOperationStatus {
        let (outcome, message) = match &self.error {
            Some(e) => (e.kind().to_string(), Some(e.to_string())),
            None if self.change.is_mutation() => (
                "Expanded".to_string(),
                Some(format!(
                    "added {} group(s), {} device(s)",
                    self.change.added_groups.len(),
                    self.change.devices_added()
                )),
            ),
            None => ("Unchanged".to_string(), None),
        };
        PoolOperationStatus {
            index: self.index as u32,
            node: self.node.clone(),
            pool: self.pool.clone(),
            outcome,
            message,
        }
    }
}

/// Aggregate outcome of an expansion pass over a topology
#[derive(Debug, Default)]
pub struct ExpansionReport {
    pub topology: String,
    pub pools: Vec<PoolOutcome>,
}

impl ExpansionReport {
    /// Pool specs that failed
    pub fn failures(&self) -> impl Iterator<Item = &PoolOutcome> {
        self.pools.iter().filter(|p| !p.is_ok())
    }

    /// Check if every pool spec completed
    pub fn is_clean(&self) -> bool {
        self.pools.iter().all(PoolOutcome::is_ok)
    }

    /// Check if any pool was mutated and persisted
    pub fn mutated(&self) -> bool {
        self.pools
            .iter()
            .any(|p| p.is_ok() && p.change.is_mutation())
    }

    /// Serializable summary for the API and standalone output
    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            topology: self.topology.clone(),
            clean: self.is_clean(),
            pools: self.pools.iter().map(|p| PoolSummary {
                status: p.to_status(),
                change: p.change.clone(),
            }).collect(),
        }
    }
}

/// Serializable view of one pool outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSummary {
    pub status: PoolOperationStatus,
    pub change: PoolChange,
}

/// Serializable view of an expansion report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub topology: String,
    pub clean: bool,
    pub pools: Vec<PoolSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeResolutionFailure;

    #[test]
    fn test_pool_change_counts() {
        let change = PoolChange {
            added_groups: vec![AddedGroup {
                name: None,
                raid_type: RaidType::Mirror,
                devices: vec!["bd-1".into(), "bd-2".into()],
            }],
            grown_groups: vec![GrownGroup {
                group_index: 0,
                devices: vec!["bd-3".into()],
            }],
            ..Default::default()
        };
        assert!(change.is_mutation());
        assert_eq!(change.devices_added(), 3);
        assert!(!PoolChange::default().is_mutation());
    }

    #[test]
    fn test_outcome_status() {
        let mut failed = PoolOutcome::new(2);
        failed.error = Some(Error::NodeResolution {
            selector: "zone=a".into(),
            failure: NodeResolutionFailure::NoMatch,
        });
        let status = failed.to_status();
        assert_eq!(status.index, 2);
        assert_eq!(status.outcome, "node_resolution");

        let unchanged = PoolOutcome::new(0);
        assert_eq!(unchanged.to_status().outcome, "Unchanged");

        let report = ExpansionReport {
            topology: "topo-a".into(),
            pools: vec![failed, unchanged],
        };
        assert!(!report.is_clean());
        assert!(!report.mutated());
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.summary().pools.len(), 2);
    }
}
