//! Operation Dispatcher
//!
//! Runs the day-2 operations of one topology in a fixed order with the
//! pool-health controller paused: expansion, then device replacement.

use crate::crd::PoolTopology;
use crate::domain::ports::ClusterPorts;
use crate::error::{Error, Result};
use crate::expansion::{ExpansionReport, PoolExpander};
use tracing::{info, warn};

/// Sequences one operations pass for a topology
pub struct OperationDispatcher {
    ports: ClusterPorts,
}

impl OperationDispatcher {
    pub fn new(ports: ClusterPorts) -> Self {
        Self { ports }
    }

    /// Run one pass over `topology`.
    ///
    /// Fails only when the pause is refused; pool-spec failures are carried
    /// in the returned report. Reconciliation is resumed whenever it was paused.
    pub async fn run(&self, topology: &PoolTopology) -> Result<ExpansionReport> {
        let name = topology.name();

        self.ports.control.pause(name).await?;

        let report = PoolExpander::new(&self.ports, name).expand(topology).await;

        if let Err(e) = self.replace_block_devices(topology).await {
            info!(topology = %name, "{}", e);
        }

        if let Err(e) = self.ports.control.resume(name).await {
            warn!(topology = %name, "Could not resume pool reconciliation: {}", e);
        }

        info!(
            topology = %name,
            pools = report.pools.len(),
            failures = report.failures().count(),
            mutated = report.mutated(),
            "Operations pass complete"
        );
        Ok(report)
    }

    async fn replace_block_devices(&self, _topology: &PoolTopology) -> Result<()> {
        Err(Error::UnsupportedOperation(
            "block device replacement is not supported yet".to_string(),
        ))
    }
}
