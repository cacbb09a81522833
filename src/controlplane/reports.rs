//! Last operations report per topology, shared with the REST API

use crate::expansion::ReportSummary;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A report with the time its pass finished
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredReport {
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub report: ReportSummary,
}

/// Latest report of every topology
#[derive(Debug, Default)]
pub struct ReportStore {
    reports: DashMap<String, StoredReport>,
}

impl ReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the topology's last report
    pub fn insert(&self, report: ReportSummary) {
        self.reports.insert(
            report.topology.clone(),
            StoredReport {
                finished_at: Utc::now(),
                report,
            },
        );
    }

    pub fn get(&self, topology: &str) -> Option<StoredReport> {
        self.reports.get(topology).map(|r| r.value().clone())
    }

    /// Drop the report of a deleted topology
    pub fn remove(&self, topology: &str) {
        self.reports.remove(topology);
    }

    /// Keep only the reports of topologies for which `keep` holds
    pub fn retain(&self, keep: impl Fn(&str) -> bool) {
        self.reports.retain(|topology, _| keep(topology));
    }

    /// All reports, sorted by topology name
    pub fn all(&self) -> Vec<StoredReport> {
        let mut reports: Vec<StoredReport> =
            self.reports.iter().map(|r| r.value().clone()).collect();
        reports.sort_by(|a, b| a.report.topology.cmp(&b.report.topology));
        reports
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}
