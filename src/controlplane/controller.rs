//! PoolTopology Controller
//!
//! Drives one operations pass per reconcile, writes the outcome into the
//! topology status and decides when to come back. Failed passes requeue on
//! a per-topology exponential backoff; clean passes requeue on the resync
//! interval.

use crate::adapters::KubeCluster;
use crate::config::OperatorConfig;
use crate::controlplane::dispatcher::OperationDispatcher;
use crate::controlplane::lease::PoolLeaseControl;
use crate::controlplane::reports::ReportStore;
use crate::crd::{
    PoolTopology, PoolTopologyStatus, StoragePool, TopologyCondition, TopologyPhase,
    TOPOLOGY_LABEL,
};
use crate::domain::ports::ClusterPorts;
use crate::error::{Error, ErrorAction, Result};
use crate::expansion::ExpansionReport;
use crate::metrics::OperatorMetrics;
use ::backoff::backoff::Backoff;
use ::backoff::ExponentialBackoff;
use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, ResourceExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =============================================================================
// Requeue Policy
// =============================================================================

/// Per-topology bounded exponential backoff
pub struct RequeuePolicy {
    initial: Duration,
    max: Duration,
    backoffs: DashMap<String, ExponentialBackoff>,
}

impl RequeuePolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            backoffs: DashMap::new(),
        }
    }

    fn policy(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial,
            initial_interval: self.initial,
            randomization_factor: 0.1,
            multiplier: 2.0,
            max_interval: self.max,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }

    /// Delay before the next attempt for `topology`
    pub fn next_delay(&self, topology: &str) -> Duration {
        let mut backoff = self
            .backoffs
            .entry(topology.to_string())
            .or_insert_with(|| self.policy());
        backoff.next_backoff().unwrap_or(self.max)
    }

    /// Forget the failure history of `topology`
    pub fn reset(&self, topology: &str) {
        self.backoffs.remove(topology);
    }

    /// Keep only the histories of topologies for which `keep` holds
    pub fn retain(&self, keep: impl Fn(&str) -> bool) {
        self.backoffs.retain(|topology, _| keep(topology));
    }

    pub fn tracked(&self) -> usize {
        self.backoffs.len()
    }
}

// =============================================================================
// Context
// =============================================================================

/// Shared state of the controller
pub struct Context {
    pub client: Client,
    pub config: OperatorConfig,
    pub metrics: OperatorMetrics,
    pub reports: Arc<ReportStore>,
    pub requeue: RequeuePolicy,
}

impl Context {
    pub fn new(
        client: Client,
        config: OperatorConfig,
        metrics: OperatorMetrics,
        reports: Arc<ReportStore>,
    ) -> Arc<Self> {
        let requeue = RequeuePolicy::new(config.backoff_initial(), config.backoff_max());
        Arc::new(Self {
            client,
            config,
            metrics,
            reports,
            requeue,
        })
    }

    fn ports(&self) -> ClusterPorts {
        let cluster = Arc::new(KubeCluster::new(
            self.client.clone(),
            self.config.namespace.clone(),
        ));
        ClusterPorts {
            nodes: cluster.clone(),
            pools: cluster.clone(),
            devices: cluster.clone(),
            control: Arc::new(PoolLeaseControl::new(
                cluster,
                self.config.lease_holder.clone(),
                self.config.lease_ttl_secs,
            )),
        }
    }
}

// =============================================================================
// Reconcile
// =============================================================================

/// Run one operations pass for `topology`
pub async fn reconcile(topology: Arc<PoolTopology>, ctx: Arc<Context>) -> Result<Action> {
    let name = topology.name_any();

    if topology.metadata.deletion_timestamp.is_some() {
        debug!(topology = %name, "Topology is being deleted");
        ctx.reports.remove(&name);
        ctx.requeue.reset(&name);
        return Ok(Action::await_change());
    }

    info!(topology = %name, pools = topology.spec.pools.len(), "Starting operations pass");
    let started = Instant::now();

    let report = match OperationDispatcher::new(ctx.ports()).run(&topology).await {
        Ok(report) => report,
        Err(e) => {
            ctx.metrics.record_aborted();
            return Err(e);
        }
    };
    ctx.metrics.record(&report, started.elapsed().as_secs_f64());

    // A status write is a watch event on the topology itself; skip writes
    // that would only move timestamps so a settled topology stays quiet.
    let status = topology_status(topology.status.as_ref(), &topology, &report);
    if status_changed(topology.status.as_ref(), &status) {
        let api: Api<PoolTopology> = Api::namespaced(ctx.client.clone(), &ctx.config.namespace);
        api.patch_status(
            &name,
            &PatchParams::default(),
            &Patch::Merge(&serde_json::json!({ "status": status })),
        )
        .await?;
    }

    ctx.reports.insert(report.summary());

    if report.is_clean() {
        ctx.requeue.reset(&name);
        Ok(Action::requeue(ctx.config.resync_interval()))
    } else {
        let delay = ctx.requeue.next_delay(&name);
        warn!(
            topology = %name,
            failures = report.failures().count(),
            delay_secs = delay.as_secs(),
            "Operations pass incomplete, retrying"
        );
        Ok(Action::requeue(delay))
    }
}

/// Map a failed reconcile to a requeue
pub fn error_policy(topology: Arc<PoolTopology>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = topology.name_any();
    error!(topology = %name, kind = error.kind(), "Operations pass failed: {}", error);

    match error.action() {
        ErrorAction::RequeueWithBackoff => Action::requeue(ctx.requeue.next_delay(&name)),
        ErrorAction::RequeueAfter(delay) => Action::requeue(delay),
        ErrorAction::NoRequeue => Action::await_change(),
    }
}

/// Status reflecting `report`, keeping conditions of `previous`
pub fn topology_status(
    previous: Option<&PoolTopologyStatus>,
    topology: &PoolTopology,
    report: &ExpansionReport,
) -> PoolTopologyStatus {
    let mut status = previous.cloned().unwrap_or_default();
    let now = Utc::now();

    status.phase = if !report.is_clean() {
        TopologyPhase::Degraded
    } else if report.mutated() {
        TopologyPhase::Expanding
    } else {
        TopologyPhase::Realized
    };
    status.desired_pools = topology.spec.pools.len() as u32;
    status.last_operation_time = Some(now);
    status.pools = report.pools.iter().map(|p| p.to_status()).collect();

    let failures = report.failures().count();
    let (value, reason, message) = if failures == 0 {
        ("True", "PassSucceeded", "all pool specs processed".to_string())
    } else {
        (
            "False",
            "PoolSpecFailed",
            format!("{} of {} pool spec(s) failed", failures, report.pools.len()),
        )
    };
    status.set_condition(TopologyCondition {
        r#type: "Realized".to_string(),
        status: value.to_string(),
        last_transition_time: Some(now),
        reason: Some(reason.to_string()),
        message: Some(message),
    });

    status
}

/// Check if `next` differs from `previous` in anything but timestamps
pub fn status_changed(previous: Option<&PoolTopologyStatus>, next: &PoolTopologyStatus) -> bool {
    let Some(previous) = previous else {
        return true;
    };
    let conditions_differ = previous.conditions.len() != next.conditions.len()
        || previous.conditions.iter().zip(&next.conditions).any(|(a, b)| {
            a.r#type != b.r#type
                || a.status != b.status
                || a.reason != b.reason
                || a.message != b.message
        });

    previous.phase != next.phase
        || previous.desired_pools != next.desired_pools
        || previous.pools != next.pools
        || conditions_differ
}

// =============================================================================
// Controller Loop
// =============================================================================

/// Map pool events to their owning topology. Only pools whose generation
/// moved trigger a pass; lease annotations leave the generation untouched.
fn pool_trigger(
    seen: Arc<DashMap<String, i64>>,
) -> impl Fn(StoragePool) -> Option<ObjectRef<PoolTopology>> + Send + Sync + 'static {
    move |pool| {
        let topology = pool.topology()?.to_string();
        if pool.metadata.deletion_timestamp.is_some() {
            seen.remove(pool.name());
        } else {
            let generation = pool.metadata.generation.unwrap_or_default();
            if seen.insert(pool.name().to_string(), generation) == Some(generation) {
                return None;
            }
        }
        let reference = ObjectRef::new(&topology);
        Some(match pool.metadata.namespace.as_deref() {
            Some(ns) => reference.within(ns),
            None => reference,
        })
    }
}

/// Drop the report and backoff of deleted topologies. A relist keeps only
/// the listed topologies, covering deletions missed while disconnected.
fn prune_topologies(
    event: &watcher::Event<PoolTopology>,
    reports: &ReportStore,
    requeue: &RequeuePolicy,
) {
    match event {
        watcher::Event::Deleted(topology) => {
            let name = topology.name_any();
            debug!(topology = %name, "Topology deleted, dropping its state");
            reports.remove(&name);
            requeue.reset(&name);
        }
        watcher::Event::Restarted(listed) => {
            let names: HashSet<String> = listed.iter().map(|t| t.name_any()).collect();
            reports.retain(|name| names.contains(name));
            requeue.retain(|name| names.contains(name));
        }
        watcher::Event::Applied(_) => {}
    }
}

/// Drop the generation seen for deleted pools
fn prune_pools(event: &watcher::Event<StoragePool>, seen: &DashMap<String, i64>) {
    match event {
        watcher::Event::Deleted(pool) => {
            seen.remove(pool.name());
        }
        watcher::Event::Restarted(listed) => {
            let names: HashSet<&str> = listed.iter().map(|p| p.name()).collect();
            seen.retain(|name, _| names.contains(name.as_str()));
        }
        watcher::Event::Applied(_) => {}
    }
}

/// Run the controller until `shutdown` fires
pub async fn run(ctx: Arc<Context>, shutdown: CancellationToken) {
    let topologies: Api<PoolTopology> = Api::namespaced(ctx.client.clone(), &ctx.config.namespace);
    let pools: Api<StoragePool> = Api::namespaced(ctx.client.clone(), &ctx.config.namespace);
    let pool_config = watcher::Config::default().labels(TOPOLOGY_LABEL);
    let seen = Arc::new(DashMap::new());

    info!(namespace = %ctx.config.namespace, "Starting PoolTopology controller");

    let controller = Controller::new(topologies.clone(), watcher::Config::default())
        .watches(pools.clone(), pool_config.clone(), pool_trigger(seen.clone()))
        .run(reconcile, error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok((obj, _)) => debug!(topology = %obj.name, "Reconciled"),
                Err(e) => warn!("Reconcile error: {}", e),
            }
        });

    // Reconcile never sees a deleted topology, so its state is dropped here
    let topology_janitor = watcher::watcher(topologies, watcher::Config::default())
        .default_backoff()
        .for_each(|event| {
            match event {
                Ok(event) => prune_topologies(&event, &ctx.reports, &ctx.requeue),
                Err(e) => warn!("Topology watch error: {}", e),
            }
            futures::future::ready(())
        });

    let pool_janitor = watcher::watcher(pools, pool_config)
        .default_backoff()
        .for_each(|event| {
            match event {
                Ok(event) => prune_pools(&event, &seen),
                Err(e) => warn!("Pool watch error: {}", e),
            }
            futures::future::ready(())
        });

    tokio::select! {
        _ = controller => info!("Controller stream ended"),
        _ = topology_janitor => warn!("Topology watch ended"),
        _ = pool_janitor => warn!("Pool watch ended"),
        _ = shutdown.cancelled() => info!("Controller shutting down"),
    }
}
