// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Periodic status output, human-readable or JSON.
//!
//! The reporter consumes only [`Registry::snapshot`] and [`Registry::count`]
//! and therefore sees the registry's weakly-consistent view; that is fine
//! for an operator display. Addresses are sorted so successive reports diff
//! cleanly.

use crate::registry::Registry;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// JSON document emitted once per report tick.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Unix timestamp (seconds) of this report.
    pub timestamp: u64,
    pub node_count: usize,
    pub nodes: BTreeMap<String, NodeStatus>,
}

/// One peer's status in JSON output.
#[derive(Debug, Serialize)]
pub struct NodeStatus {
    pub address: String,
    pub status: String,
    pub status_code: u8,
    pub age_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ram_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_pct: Option<f64>,
}

/// Periodic status reporter over a shared registry handle.
pub struct Reporter {
    registry: Arc<Registry>,
    json: bool,
}

impl Reporter {
    #[must_use]
    pub fn new(registry: Arc<Registry>, json: bool) -> Self {
        Self { registry, json }
    }

    /// Spawn the report ticker; it runs until `stop` is signalled or
    /// disconnected.
    ///
    /// # Errors
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn(self, interval: Duration, stop: Receiver<()>) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("pulse-report".to_string())
            .spawn(move || loop {
                match stop.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => self.report(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        debug!("reporter shutting down");
                        break;
                    }
                }
            })
    }

    /// Emit one report to stdout.
    pub fn report(&self) {
        if self.json {
            match serde_json::to_string_pretty(&self.build_report()) {
                Ok(doc) => println!("{doc}"),
                Err(err) => eprintln!("error encoding status report: {err}"),
            }
        } else {
            print!("{}", self.render_human());
        }
    }

    fn build_report(&self) -> StatusReport {
        let nodes = self.registry.snapshot();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let mut entries = BTreeMap::new();
        for (addr, record) in nodes {
            let has_metrics =
                record.cpu_pct > 0.0 || record.ram_pct > 0.0 || record.disk_pct > 0.0;
            entries.insert(
                addr.clone(),
                NodeStatus {
                    address: addr,
                    status: record.severity.label().to_string(),
                    status_code: record.severity.code(),
                    age_secs: record.age().as_secs(),
                    cpu_pct: has_metrics.then_some(record.cpu_pct),
                    ram_pct: has_metrics.then_some(record.ram_pct),
                    disk_pct: has_metrics.then_some(record.disk_pct),
                },
            );
        }

        StatusReport {
            timestamp,
            node_count: entries.len(),
            nodes: entries,
        }
    }

    fn render_human(&self) -> String {
        use std::fmt::Write as _;

        let nodes: BTreeMap<String, _> = self.registry.snapshot().into_iter().collect();
        let mut out = String::new();
        let _ = writeln!(out, "\n=== PulseCheck Status (Nodes: {}) ===", nodes.len());

        if nodes.is_empty() {
            out.push_str("No active nodes\n");
            return out;
        }

        for (addr, record) in nodes {
            let _ = write!(
                out,
                "Node: {} | Status: {} | Age: {}s",
                addr,
                record.severity.label(),
                record.age().as_secs()
            );
            if record.cpu_pct > 0.0 || record.ram_pct > 0.0 || record.disk_pct > 0.0 {
                let _ = write!(
                    out,
                    " | CPU: {:.1}% RAM: {:.1}% Disk: {:.1}%",
                    record.cpu_pct, record.ram_pct, record.disk_pct
                );
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::Severity;

    #[test]
    fn test_human_report_empty_registry() {
        let reporter = Reporter::new(Arc::new(Registry::new()), false);
        let text = reporter.render_human();
        assert!(text.contains("Nodes: 0"));
        assert!(text.contains("No active nodes"));
    }

    #[test]
    fn test_human_report_lists_peers() {
        let registry = Arc::new(Registry::new());
        registry.update_with_severity("10.0.0.2:9999", Severity::Warn, 5);
        registry.update_with_telemetry("10.0.0.1:9999", 12.0, 40.5, 70.0, Severity::Ok);

        let reporter = Reporter::new(Arc::clone(&registry), false);
        let text = reporter.render_human();

        assert!(text.contains("Nodes: 2"));
        assert!(text.contains("Node: 10.0.0.2:9999 | Status: WARN"));
        // Metrics are shown only for records that carry them (the self-entry).
        assert!(text.contains("CPU: 12.0% RAM: 40.5% Disk: 70.0%"));
        let warn_line = text
            .lines()
            .find(|line| line.contains("10.0.0.2"))
            .expect("warn line present");
        assert!(!warn_line.contains("CPU:"));
    }

    #[test]
    fn test_json_report_structure() {
        let registry = Arc::new(Registry::new());
        registry.update_with_severity("10.0.0.2:9999", Severity::Critical, 123);

        let reporter = Reporter::new(Arc::clone(&registry), true);
        let report = reporter.build_report();
        assert_eq!(report.node_count, 1);

        let json = serde_json::to_value(&report).expect("report serializes");
        let node = &json["nodes"]["10.0.0.2:9999"];
        assert_eq!(node["status"], "CRITICAL");
        assert_eq!(node["status_code"], 2);
        // Remote records carry no metrics, so the fields are omitted.
        assert!(node.get("cpu_pct").is_none());
    }

    #[test]
    fn test_json_report_includes_self_metrics() {
        let registry = Arc::new(Registry::new());
        registry.update_with_telemetry("127.0.0.1:9999", 55.0, 66.0, 77.0, Severity::Warn);

        let reporter = Reporter::new(Arc::clone(&registry), true);
        let json =
            serde_json::to_value(reporter.build_report()).expect("report serializes");
        let node = &json["nodes"]["127.0.0.1:9999"];
        assert_eq!(node["cpu_pct"], 55.0);
        assert_eq!(node["ram_pct"], 66.0);
        assert_eq!(node["disk_pct"], 77.0);
        assert_eq!(node["status"], "WARN");
    }

    #[test]
    fn test_reporter_thread_stops_on_disconnect() {
        let reporter = Reporter::new(Arc::new(Registry::new()), true);
        let (stop_tx, stop_rx) = crossbeam::channel::bounded::<()>(0);
        let handle = reporter
            .spawn(Duration::from_secs(60), stop_rx)
            .expect("reporter spawns");
        drop(stop_tx);
        handle.join().expect("reporter joins cleanly");
    }
}
