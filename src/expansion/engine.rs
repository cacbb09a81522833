//! Pool Expansion Engine
//!
//! Walks the pool specs of a topology one after another. For each spec:
//! resolve the node, look up the node's pool, append new raid groups,
//! widen existing striped groups, and persist. Failures stay scoped to the
//! device, group or pool spec they occur in.

use super::gate::UsabilityGate;
use super::membership::{added_devices, is_raid_group_present, matching_group, validate_pool_spec};
use super::report::{AddedGroup, ExpansionReport, GrownGroup, PoolChange, PoolOutcome, RejectedDevice};
use crate::crd::{BlockDeviceRef, PoolRaidGroup, PoolSpec, PoolTopology, StoragePool};
use crate::domain::ports::{ClusterPorts, NodeResolverRef, PoolStoreRef};
use crate::error::{Error, Result};
use tracing::{debug, error, info, warn};

// =============================================================================
// Pool Expander
// =============================================================================

/// Add-only expansion of the pools owned by one topology
pub struct PoolExpander {
    nodes: NodeResolverRef,
    pools: PoolStoreRef,
    gate: UsabilityGate,
}

impl PoolExpander {
    /// Create an expander acting for `topology`
    pub fn new(ports: &ClusterPorts, topology: &str) -> Self {
        Self {
            nodes: ports.nodes.clone(),
            pools: ports.pools.clone(),
            gate: UsabilityGate::new(ports.devices.clone(), topology),
        }
    }

    /// Run one expansion pass over every pool spec of `topology`.
    ///
    /// Never fails as a whole; each pool spec's failure is recorded in
    /// its outcome and the next spec is still processed.
    pub async fn expand(&self, topology: &PoolTopology) -> ExpansionReport {
        let name = topology.name().to_string();
        let mut report = ExpansionReport {
            topology: name.clone(),
            pools: Vec::with_capacity(topology.spec.pools.len()),
        };

        for (index, spec) in topology.spec.pools.iter().enumerate() {
            let mut outcome = PoolOutcome::new(index);
            if let Err(e) = self.expand_pool(&name, spec, &mut outcome).await {
                error!(
                    topology = %name,
                    pool_spec = index,
                    node = outcome.node.as_deref().unwrap_or("-"),
                    "Pool expansion failed: {}", e
                );
                outcome.error = Some(e);
            }
            report.pools.push(outcome);
        }

        report
    }

    /// Expand the pool described by one pool spec
    async fn expand_pool(
        &self,
        topology: &str,
        spec: &PoolSpec,
        outcome: &mut PoolOutcome,
    ) -> Result<()> {
        if spec.raid_groups.is_empty() {
            debug!(topology, pool_spec = outcome.index, "Pool spec has no raid groups");
            return Ok(());
        }
        validate_pool_spec(spec)?;

        let node = self.nodes.resolve_node(&spec.node_selector).await?;
        outcome.node = Some(node.clone());

        let mut pool = self.pool_on_node(topology, &node).await?;
        outcome.pool = Some(pool.name().to_string());

        let mut change = PoolChange::default();

        if spec.raid_groups.len() > pool.spec.raid_groups.len() {
            self.add_new_groups(spec, &mut pool, &mut change).await;
        }
        self.grow_striped_groups(spec, &mut pool, &mut change).await;

        let mutated = change.is_mutation();
        outcome.change = change;

        if !mutated {
            debug!(pool = %pool.name(), "No expansion needed");
            return Ok(());
        }

        self.persist(&pool).await?;
        info!(
            pool = %pool.name(),
            node = %node,
            groups_added = outcome.change.added_groups.len(),
            devices_added = outcome.change.devices_added(),
            "Expanded pool"
        );
        Ok(())
    }

    /// Find the single pool of `topology` bound to `node`
    async fn pool_on_node(&self, topology: &str, node: &str) -> Result<StoragePool> {
        let mut matches: Vec<StoragePool> = self
            .pools
            .list_pools(topology)
            .await?
            .into_iter()
            .filter(|p| p.node_name() == node)
            .collect();

        if matches.len() == 1 {
            Ok(matches.remove(0))
        } else {
            Err(Error::PoolLookup {
                topology: topology.to_string(),
                node: node.to_string(),
                found: matches.len(),
            })
        }
    }

    /// Append every desired group not yet on the pool whose devices all
    /// pass the gate. A group with any unusable device is left out whole.
    async fn add_new_groups(&self, spec: &PoolSpec, pool: &mut StoragePool, change: &mut PoolChange) {
        for group in &spec.raid_groups {
            if is_raid_group_present(group, pool) {
                continue;
            }

            let raid_type = spec.group_type(group);
            if group.block_devices.len() < raid_type.min_devices() {
                warn!(
                    pool = %pool.name(),
                    raid_type = %raid_type,
                    devices = group.block_devices.len(),
                    "Raid group is narrower than its type allows, skipping"
                );
                change.skipped_groups.push(group_label(group.name.as_deref(), group.device_names()));
                continue;
            }

            let mut valid = true;
            for device in group.device_names() {
                if let Err(e) = self.gate.check(device).await {
                    error!(pool = %pool.name(), device, "Could not use block device for new raid group: {}", e);
                    change.rejected_devices.push(rejection(device, &e));
                    valid = false;
                    break;
                }
            }
            if !valid {
                continue;
            }

            pool.spec.raid_groups.push(PoolRaidGroup {
                name: group.name.clone(),
                raid_type,
                block_devices: group.block_devices.clone(),
            });
            change.added_groups.push(AddedGroup {
                name: group.name.clone(),
                raid_type,
                devices: group.device_names().map(str::to_string).collect(),
            });
            info!(pool = %pool.name(), raid_type = %raid_type, "Added raid group");
        }
    }

    /// Widen striped groups already on the pool with their newly listed
    /// devices, stopping a group at its first unusable device.
    async fn grow_striped_groups(&self, spec: &PoolSpec, pool: &mut StoragePool, change: &mut PoolChange) {
        for (index, group) in spec.raid_groups.iter().enumerate() {
            if !spec.group_type(group).is_growable() || !is_raid_group_present(group, pool) {
                continue;
            }

            let Some(pos) = matching_group(group, index, pool) else {
                continue;
            };
            let actual = &pool.spec.raid_groups[pos];
            if !actual.raid_type.is_growable() {
                debug!(
                    pool = %pool.name(),
                    group = pos,
                    raid_type = %actual.raid_type,
                    "Matched raid group is not striped, leaving it unchanged"
                );
                continue;
            }
            if group.block_devices.len() <= actual.block_devices.len() {
                continue;
            }

            let candidates = added_devices(group, actual);
            if candidates.is_empty() {
                debug!(pool = %pool.name(), group = pos, "No new block devices for raid group");
                continue;
            }

            let mut appended = Vec::new();
            for device in candidates {
                if pool.device_names().contains(device.as_str()) {
                    warn!(pool = %pool.name(), device = %device, "Block device already in another raid group");
                    change.rejected_devices.push(RejectedDevice {
                        device,
                        reason: "already in another raid group of the pool".to_string(),
                    });
                    continue;
                }
                if let Err(e) = self.gate.check(&device).await {
                    error!(pool = %pool.name(), device = %device, "Could not use block device for expanding pool: {}", e);
                    change.rejected_devices.push(rejection(&device, &e));
                    break;
                }
                pool.spec.raid_groups[pos]
                    .block_devices
                    .push(BlockDeviceRef::new(device.as_str()));
                appended.push(device);
            }

            if !appended.is_empty() {
                info!(pool = %pool.name(), group = pos, devices = ?appended, "Grew striped raid group");
                change.grown_groups.push(GrownGroup {
                    group_index: pos,
                    devices: appended,
                });
            }
        }
    }

    /// Write the mutated pool back; any failure becomes `Error::Persist`
    async fn persist(&self, pool: &StoragePool) -> Result<()> {
        match self.pools.update_pool(pool).await {
            Ok(_) => Ok(()),
            Err(e @ Error::Persist { .. }) => Err(e),
            Err(e) => Err(Error::Persist {
                pool: pool.name().to_string(),
                reason: e.to_string(),
                conflict: false,
            }),
        }
    }
}

fn rejection(device: &str, err: &Error) -> RejectedDevice {
    let reason = match err {
        Error::DeviceUnusable { reason, .. } => reason.clone(),
        other => other.to_string(),
    };
    RejectedDevice {
        device: device.to_string(),
        reason,
    }
}

fn group_label<'a>(name: Option<&str>, devices: impl Iterator<Item = &'a str>) -> String {
    match name {
        Some(name) => name.to_string(),
        None => devices.collect::<Vec<_>>().join(","),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryCluster;
    use crate::crd::{PoolConfig, PoolTopologySpec, RaidGroupSpec, RaidType};
    use crate::error::NodeResolutionFailure;
    use assert_matches::assert_matches;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Arc;

    const TOPO: &str = "topo-a";

    fn selector(node: &str) -> BTreeMap<String, String> {
        [("kubernetes.io/hostname".to_string(), node.to_string())]
            .into_iter()
            .collect()
    }

    fn group(raid_type: Option<RaidType>, devices: &[&str]) -> RaidGroupSpec {
        RaidGroupSpec {
            name: None,
            raid_type,
            block_devices: devices.iter().map(|d| BlockDeviceRef::new(*d)).collect(),
        }
    }

    fn pool_group(raid_type: RaidType, devices: &[&str]) -> PoolRaidGroup {
        PoolRaidGroup {
            name: None,
            raid_type,
            block_devices: devices.iter().map(|d| BlockDeviceRef::new(*d)).collect(),
        }
    }

    fn topology(pools: Vec<PoolSpec>) -> PoolTopology {
        let mut topo = PoolTopology::new(TOPO, PoolTopologySpec { pools });
        topo.metadata.namespace = Some("storage".into());
        topo
    }

    fn pool_spec(node: &str, default: RaidType, groups: Vec<RaidGroupSpec>) -> PoolSpec {
        PoolSpec {
            node_selector: selector(node),
            pool_config: PoolConfig {
                default_raid_group_type: default,
            },
            raid_groups: groups,
        }
    }

    /// One node with one pool holding `groups`, plus free devices
    fn cluster(groups: Vec<PoolRaidGroup>, free: &[&str]) -> Arc<InMemoryCluster> {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.add_node("node-1", selector("node-1"));
        for g in &groups {
            for d in g.device_names() {
                cluster.add_device(d, "node-1");
                cluster.add_claim(d, TOPO);
            }
        }
        for d in free {
            cluster.add_device(d, "node-1");
        }
        cluster.add_pool("pool-node-1", "node-1", TOPO, groups);
        cluster
    }

    fn expander(cluster: &Arc<InMemoryCluster>) -> PoolExpander {
        PoolExpander::new(&cluster.ports(), TOPO)
    }

    fn pool_devices(cluster: &InMemoryCluster) -> Vec<Vec<String>> {
        cluster
            .pool("pool-node-1")
            .unwrap()
            .spec
            .raid_groups
            .iter()
            .map(|g| g.device_names().map(str::to_string).collect())
            .collect()
    }

    #[tokio::test]
    async fn test_grows_striped_group() {
        let cluster = cluster(vec![pool_group(RaidType::Striped, &["d1"])], &["d2"]);
        let topo = topology(vec![pool_spec(
            "node-1",
            RaidType::Striped,
            vec![group(Some(RaidType::Striped), &["d1", "d2"])],
        )]);

        let report = expander(&cluster).expand(&topo).await;

        assert!(report.is_clean());
        assert_eq!(pool_devices(&cluster), vec![vec!["d1", "d2"]]);
        assert_eq!(report.pools[0].change.grown_groups[0].devices, vec!["d2"]);
        assert_eq!(cluster.update_count(), 1);
    }

    #[tokio::test]
    async fn test_adds_new_group() {
        let cluster = cluster(
            vec![pool_group(RaidType::Mirror, &["d1", "d2"])],
            &["d3", "d4"],
        );
        let topo = topology(vec![pool_spec(
            "node-1",
            RaidType::Mirror,
            vec![group(None, &["d1", "d2"]), group(None, &["d3", "d4"])],
        )]);

        let report = expander(&cluster).expand(&topo).await;

        assert!(report.is_clean());
        let pool = cluster.pool("pool-node-1").unwrap();
        assert_eq!(pool.spec.raid_groups.len(), 2);
        assert_eq!(pool.spec.raid_groups[1], pool_group(RaidType::Mirror, &["d3", "d4"]));
        assert_eq!(cluster.claim_owner("d3").as_deref(), Some(TOPO));
    }

    #[tokio::test]
    async fn test_second_pass_is_noop() {
        let cluster = cluster(vec![pool_group(RaidType::Striped, &["d1"])], &["d2", "d3"]);
        let topo = topology(vec![pool_spec(
            "node-1",
            RaidType::Striped,
            vec![group(None, &["d1", "d2"]), group(None, &["d3"])],
        )]);

        let expander = expander(&cluster);
        let first = expander.expand(&topo).await;
        assert!(first.mutated());
        let updates = cluster.update_count();

        let second = expander.expand(&topo).await;
        assert!(second.is_clean());
        assert!(!second.mutated());
        assert_eq!(cluster.update_count(), updates);
    }

    #[tokio::test]
    async fn test_zero_node_match_issues_no_update() {
        let cluster = cluster(vec![pool_group(RaidType::Striped, &["d1"])], &["d2"]);
        let topo = topology(vec![pool_spec(
            "node-missing",
            RaidType::Striped,
            vec![group(None, &["d1", "d2"])],
        )]);

        let report = expander(&cluster).expand(&topo).await;

        assert_matches!(
            report.pools[0].error,
            Some(Error::NodeResolution { failure: NodeResolutionFailure::NoMatch, .. })
        );
        assert_eq!(cluster.update_count(), 0);
    }

    #[tokio::test]
    async fn test_group_with_foreign_device_is_dropped_whole() {
        let cluster = cluster(
            vec![pool_group(RaidType::Striped, &["d1"])],
            &["d2", "d3", "d4", "d5", "d6"],
        );
        cluster.add_claim("d3", "topo-b");
        let topo = topology(vec![pool_spec(
            "node-1",
            RaidType::Mirror,
            vec![
                group(Some(RaidType::Striped), &["d1"]),
                group(None, &["d2", "d3"]),
                group(None, &["d4", "d5"]),
            ],
        )]);

        let report = expander(&cluster).expand(&topo).await;

        assert!(report.is_clean());
        let devices = pool_devices(&cluster);
        assert_eq!(devices, vec![vec!["d1"], vec!["d4", "d5"]]);
        assert!(!devices.iter().flatten().any(|d| d == "d2" || d == "d3"));
        assert_eq!(report.pools[0].change.rejected_devices[0].device, "d3");
        assert_eq!(cluster.claim_owner("d3").as_deref(), Some("topo-b"));
    }

    #[tokio::test]
    async fn test_growth_stops_at_first_unusable_device() {
        let cluster = cluster(vec![pool_group(RaidType::Striped, &["d1"])], &["d2", "d4"]);
        // d3 has no device resource
        let topo = topology(vec![pool_spec(
            "node-1",
            RaidType::Striped,
            vec![group(None, &["d1", "d2", "d3", "d4"])],
        )]);

        let report = expander(&cluster).expand(&topo).await;

        assert_eq!(pool_devices(&cluster), vec![vec!["d1", "d2"]]);
        assert_eq!(report.pools[0].change.rejected_devices.len(), 1);
        assert_eq!(cluster.claim_owner("d4"), None);
    }

    #[tokio::test]
    async fn test_non_striped_groups_never_grow() {
        let cluster = cluster(
            vec![
                pool_group(RaidType::Mirror, &["d1", "d2"]),
                pool_group(RaidType::Raidz, &["d3", "d4", "d5"]),
            ],
            &["d6", "d7"],
        );
        let topo = topology(vec![pool_spec(
            "node-1",
            RaidType::Mirror,
            vec![
                group(None, &["d1", "d2", "d6"]),
                // Desired type changed to striped, actual group stays raidz
                group(Some(RaidType::Striped), &["d3", "d4", "d5", "d7"]),
            ],
        )]);

        let report = expander(&cluster).expand(&topo).await;

        assert!(report.is_clean());
        assert!(!report.mutated());
        assert_eq!(
            pool_devices(&cluster),
            vec![vec!["d1", "d2"], vec!["d3", "d4", "d5"]]
        );
        assert_eq!(cluster.update_count(), 0);
    }

    #[tokio::test]
    async fn test_pool_lookup_failure_does_not_stop_next_spec() {
        let cluster = cluster(vec![pool_group(RaidType::Striped, &["d1"])], &["d2"]);
        cluster.add_node("node-2", selector("node-2"));
        let topo = topology(vec![
            pool_spec("node-2", RaidType::Striped, vec![group(None, &["x1"])]),
            pool_spec("node-1", RaidType::Striped, vec![group(None, &["d1", "d2"])]),
        ]);

        let report = expander(&cluster).expand(&topo).await;

        assert_matches!(report.pools[0].error, Some(Error::PoolLookup { found: 0, .. }));
        assert!(report.pools[1].is_ok());
        assert_eq!(pool_devices(&cluster), vec![vec!["d1", "d2"]]);
    }

    #[tokio::test]
    async fn test_persist_conflict_is_reported_and_dropped() {
        let cluster = cluster(vec![pool_group(RaidType::Striped, &["d1"])], &["d2"]);
        cluster.fail_next_update_with_conflict();
        let topo = topology(vec![pool_spec(
            "node-1",
            RaidType::Striped,
            vec![group(None, &["d1", "d2"])],
        )]);

        let report = expander(&cluster).expand(&topo).await;

        assert_matches!(report.pools[0].error, Some(Error::Persist { conflict: true, .. }));
        assert!(report.pools[0].change.is_mutation());
        assert_eq!(pool_devices(&cluster), vec![vec!["d1"]]);

        // Next pass recomputes and succeeds
        let report = expander(&cluster).expand(&topo).await;
        assert!(report.is_clean());
        assert_eq!(pool_devices(&cluster), vec![vec!["d1", "d2"]]);
    }

    #[tokio::test]
    async fn test_add_only_superset() {
        let cluster = cluster(
            vec![
                pool_group(RaidType::Striped, &["d1", "d2"]),
                pool_group(RaidType::Mirror, &["d3", "d4"]),
            ],
            &["d5", "d6", "d7"],
        );
        // Desired drops d2 and d4: nothing may be removed
        let topo = topology(vec![pool_spec(
            "node-1",
            RaidType::Striped,
            vec![
                group(None, &["d1", "d5", "d6"]),
                group(Some(RaidType::Mirror), &["d3"]),
                group(None, &["d7"]),
            ],
        )]);
        let before: HashSet<String> = pool_devices(&cluster).into_iter().flatten().collect();

        let report = expander(&cluster).expand(&topo).await;

        assert!(report.is_clean());
        let after: HashSet<String> = pool_devices(&cluster).into_iter().flatten().collect();
        assert!(after.is_superset(&before));
        assert!(after.contains("d5") && after.contains("d6") && after.contains("d7"));
    }

    #[tokio::test]
    async fn test_device_on_other_group_is_not_duplicated() {
        let cluster = cluster(
            vec![
                pool_group(RaidType::Striped, &["d1"]),
                pool_group(RaidType::Striped, &["d2"]),
            ],
            &["d3"],
        );
        let topo = topology(vec![pool_spec(
            "node-1",
            RaidType::Striped,
            vec![group(None, &["d1", "d2", "d3"]), group(None, &["d2"])],
        )]);

        // d2 listed twice is rejected as an invalid spec
        let report = expander(&cluster).expand(&topo).await;
        assert_matches!(report.pools[0].error, Some(Error::InvalidPoolSpec(_)));

        let topo = topology(vec![pool_spec(
            "node-1",
            RaidType::Striped,
            vec![group(None, &["d1", "d2", "d3"])],
        )]);
        let report = expander(&cluster).expand(&topo).await;
        assert!(report.is_clean());
        assert_eq!(pool_devices(&cluster), vec![vec!["d1", "d3"], vec!["d2"]]);
        assert_eq!(report.pools[0].change.rejected_devices[0].device, "d2");
    }

    #[tokio::test]
    async fn test_narrow_group_is_skipped() {
        let cluster = cluster(vec![pool_group(RaidType::Striped, &["d1"])], &["d2", "d3"]);
        let topo = topology(vec![pool_spec(
            "node-1",
            RaidType::Striped,
            vec![
                group(None, &["d1"]),
                group(Some(RaidType::Raidz), &["d2", "d3"]),
            ],
        )]);

        let report = expander(&cluster).expand(&topo).await;

        assert_eq!(report.pools[0].change.skipped_groups, vec!["d2,d3"]);
        assert_eq!(pool_devices(&cluster), vec![vec!["d1"]]);
        assert_eq!(cluster.claim_owner("d2"), None);
    }

    #[tokio::test]
    async fn test_unset_type_uses_current_default() {
        let cluster = cluster(vec![pool_group(RaidType::Mirror, &["d1", "d2"])], &["d3", "d4"]);
        let topo = topology(vec![pool_spec(
            "node-1",
            RaidType::Striped,
            vec![
                group(Some(RaidType::Mirror), &["d1", "d2"]),
                group(None, &["d3", "d4"]),
            ],
        )]);

        expander(&cluster).expand(&topo).await;

        let pool = cluster.pool("pool-node-1").unwrap();
        assert_eq!(pool.spec.raid_groups[1].raid_type, RaidType::Striped);
    }

    #[tokio::test]
    async fn test_named_group_is_stamped() {
        let cluster = cluster(vec![pool_group(RaidType::Striped, &["d1"])], &["d2"]);
        let mut named = group(Some(RaidType::Striped), &["d2"]);
        named.name = Some("fast".into());
        let topo = topology(vec![pool_spec(
            "node-1",
            RaidType::Striped,
            vec![group(None, &["d1"]), named],
        )]);

        expander(&cluster).expand(&topo).await;

        let pool = cluster.pool("pool-node-1").unwrap();
        assert_eq!(pool.spec.raid_groups[1].name.as_deref(), Some("fast"));
    }

    #[tokio::test]
    async fn test_empty_pool_spec_is_noop() {
        let cluster = cluster(vec![pool_group(RaidType::Striped, &["d1"])], &[]);
        let topo = topology(vec![pool_spec("node-unknown", RaidType::Striped, vec![])]);

        let report = expander(&cluster).expand(&topo).await;

        assert!(report.is_clean());
        assert_eq!(report.pools[0].node, None);
        assert_eq!(cluster.update_count(), 0);
    }

    #[tokio::test]
    async fn test_two_pools_on_node_fail_lookup() {
        let cluster = cluster(vec![pool_group(RaidType::Striped, &["d1"])], &["d2"]);
        cluster.add_pool("pool-node-1-b", "node-1", TOPO, vec![]);
        let topo = topology(vec![pool_spec(
            "node-1",
            RaidType::Striped,
            vec![group(None, &["d1", "d2"])],
        )]);

        let report = expander(&cluster).expand(&topo).await;

        assert_matches!(report.pools[0].error, Some(Error::PoolLookup { found: 2, .. }));
        assert_eq!(pool_devices(&cluster), vec![vec!["d1"]]);
        assert_eq!(cluster.claim_owner("d2"), None);
        assert_eq!(cluster.update_count(), 0);
    }

    #[tokio::test]
    async fn test_ambiguous_selector_aborts_only_its_spec() {
        let cluster = cluster(vec![pool_group(RaidType::Striped, &["d1"])], &["d2"]);
        let rack: BTreeMap<String, String> =
            [("rack".to_string(), "r1".to_string())].into_iter().collect();
        cluster.add_node("node-2", rack.clone());
        cluster.add_node("node-3", rack.clone());
        let topo = topology(vec![
            PoolSpec {
                node_selector: rack,
                pool_config: PoolConfig::default(),
                raid_groups: vec![group(None, &["x1"])],
            },
            pool_spec("node-1", RaidType::Striped, vec![group(None, &["d1", "d2"])]),
        ]);

        let report = expander(&cluster).expand(&topo).await;

        assert_matches!(
            report.pools[0].error,
            Some(Error::NodeResolution { failure: NodeResolutionFailure::Ambiguous(2), .. })
        );
        assert!(report.pools[1].is_ok());
        assert_eq!(pool_devices(&cluster), vec![vec!["d1", "d2"]]);
    }
}
