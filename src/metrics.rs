//! Operator Metrics
//!
//! Prometheus metrics for operations passes, kept in a dedicated registry
//! that the metrics server encodes on `/metrics`.

use crate::error::{Error, Result};
use crate::expansion::ExpansionReport;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

const NAMESPACE: &str = "pool_topology";

/// Metrics recorded per operations pass
#[derive(Clone)]
pub struct OperatorMetrics {
    registry: Registry,
    passes: IntCounterVec,
    groups_added: IntCounter,
    devices_added: IntCounter,
    devices_rejected: IntCounter,
    pool_spec_failures: IntCounterVec,
    persist_failures: IntCounterVec,
    pass_duration: Histogram,
}

fn registration(e: prometheus::Error) -> Error {
    Error::Internal(format!("Failed to register metric: {}", e))
}

impl OperatorMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let passes = IntCounterVec::new(
            Opts::new("passes_total", "Operations passes by result").namespace(NAMESPACE),
            &["result"],
        )
        .map_err(registration)?;
        let groups_added = IntCounter::with_opts(
            Opts::new("raid_groups_added_total", "Raid groups appended to pools").namespace(NAMESPACE),
        )
        .map_err(registration)?;
        let devices_added = IntCounter::with_opts(
            Opts::new("block_devices_added_total", "Block devices added to pools").namespace(NAMESPACE),
        )
        .map_err(registration)?;
        let devices_rejected = IntCounter::with_opts(
            Opts::new("block_devices_rejected_total", "Block devices turned away by the usability gate")
                .namespace(NAMESPACE),
        )
        .map_err(registration)?;
        let pool_spec_failures = IntCounterVec::new(
            Opts::new("pool_spec_failures_total", "Failed pool specs by error kind").namespace(NAMESPACE),
            &["kind"],
        )
        .map_err(registration)?;
        let persist_failures = IntCounterVec::new(
            Opts::new("persist_failures_total", "Failed pool updates").namespace(NAMESPACE),
            &["conflict"],
        )
        .map_err(registration)?;
        let pass_duration = Histogram::with_opts(
            HistogramOpts::new("pass_duration_seconds", "Duration of operations passes")
                .namespace(NAMESPACE),
        )
        .map_err(registration)?;

        registry.register(Box::new(passes.clone())).map_err(registration)?;
        registry.register(Box::new(groups_added.clone())).map_err(registration)?;
        registry.register(Box::new(devices_added.clone())).map_err(registration)?;
        registry.register(Box::new(devices_rejected.clone())).map_err(registration)?;
        registry.register(Box::new(pool_spec_failures.clone())).map_err(registration)?;
        registry.register(Box::new(persist_failures.clone())).map_err(registration)?;
        registry.register(Box::new(pass_duration.clone())).map_err(registration)?;

        Ok(Self {
            registry,
            passes,
            groups_added,
            devices_added,
            devices_rejected,
            pool_spec_failures,
            persist_failures,
            pass_duration,
        })
    }

    /// Record the outcome of a finished pass
    pub fn record(&self, report: &ExpansionReport, elapsed_secs: f64) {
        let result = if report.is_clean() { "clean" } else { "partial" };
        self.passes.with_label_values(&[result]).inc();
        self.pass_duration.observe(elapsed_secs);

        for pool in &report.pools {
            // Gate rejections stand even when the pool write failed
            self.devices_rejected
                .inc_by(pool.change.rejected_devices.len() as u64);
            if let Some(err) = &pool.error {
                self.pool_spec_failures.with_label_values(&[err.kind()]).inc();
                if let Error::Persist { conflict, .. } = err {
                    let label = if *conflict { "true" } else { "false" };
                    self.persist_failures.with_label_values(&[label]).inc();
                }
                continue;
            }
            self.groups_added
                .inc_by(pool.change.added_groups.len() as u64);
            self.devices_added.inc_by(pool.change.devices_added() as u64);
        }
    }

    /// Record a pass that could not start
    pub fn record_aborted(&self) {
        self.passes.with_label_values(&["aborted"]).inc();
    }

    /// Encode all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("Failed to encode metrics: {}", e)))?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}
