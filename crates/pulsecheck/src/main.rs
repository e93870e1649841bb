// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! pulsecheck - decentralized UDP node-health monitor.
//!
//! Usage:
//!   pulsecheck --port 9999
//!   pulsecheck --port 9999 --seed-node 10.0.0.1:9999
//!   pulsecheck --heartbeat-interval 2s --timeout 10s --json
//!
//! Container deployments may override flags through `PORT`,
//! `HEARTBEAT_INTERVAL`, `TIMEOUT`, `NODE_ID`, and `SEED_NODE`.

use clap::Parser;
use pulsecheck::config::NodeConfig;
use pulsecheck::engine::DEFAULT_PORT;
use pulsecheck::node::Node;
use pulsecheck::report::Reporter;
use pulsecheck::telemetry::{SystemSampler, Thresholds};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pulsecheck")]
#[command(about = "Decentralized UDP node-health monitor")]
#[command(version)]
struct Args {
    /// UDP port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Time between heartbeats (e.g. 5s, 500ms)
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    heartbeat_interval: Duration,

    /// Silence before a peer is marked offline
    #[arg(long, default_value = "15s", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// Unique identifier for this node (default: hostname)
    #[arg(long)]
    node_id: Option<String>,

    /// Seed peer address for bootstrap (host:port)
    #[arg(long)]
    seed_node: Option<String>,

    /// Emit status reports as JSON
    #[arg(long)]
    json: bool,

    /// Time between status reports
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    report_interval: Duration,

    /// CPU percentage for WARN status
    #[arg(long, default_value_t = 70.0)]
    cpu_warn_threshold: f64,

    /// CPU percentage for CRITICAL status
    #[arg(long, default_value_t = 90.0)]
    cpu_critical_threshold: f64,

    /// RAM percentage for WARN status
    #[arg(long, default_value_t = 80.0)]
    ram_warn_threshold: f64,

    /// RAM percentage for CRITICAL status
    #[arg(long, default_value_t = 95.0)]
    ram_critical_threshold: f64,

    /// Disk percentage for WARN status
    #[arg(long, default_value_t = 85.0)]
    disk_warn_threshold: f64,

    /// Disk percentage for CRITICAL status
    #[arg(long, default_value_t = 95.0)]
    disk_critical_threshold: f64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> NodeConfig {
        NodeConfig {
            port: self.port,
            heartbeat_interval: self.heartbeat_interval,
            timeout: self.timeout,
            report_interval: self.report_interval,
            node_id: self.node_id,
            seed_node: self.seed_node,
            json_output: self.json,
            thresholds: Thresholds {
                cpu_warn: self.cpu_warn_threshold,
                cpu_critical: self.cpu_critical_threshold,
                ram_warn: self.ram_warn_threshold,
                ram_critical: self.ram_critical_threshold,
                disk_warn: self.disk_warn_threshold,
                disk_critical: self.disk_critical_threshold,
            },
            ..Default::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = args.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let mut config = args.into_config();
    config.apply_env()?;
    config.validate()?;

    info!("PulseCheck v{}", env!("CARGO_PKG_VERSION"));
    info!(
        port = config.port,
        heartbeat = ?config.heartbeat_interval,
        timeout = ?config.timeout,
        seed = config.seed_node.as_deref().unwrap_or("-"),
        "starting node"
    );

    let report_interval = config.report_interval;
    let json_output = config.json_output;

    let mut node = Node::bind(config, Box::new(SystemSampler::new()))?;
    node.start()?;

    let (report_stop_tx, report_stop_rx) = crossbeam::channel::bounded::<()>(0);
    let reporter = Reporter::new(node.registry(), json_output);
    let reporter_handle = reporter.spawn(report_interval, report_stop_rx)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    info!("shutdown signal received, stopping node");
    drop(report_stop_tx);
    let _ = reporter_handle.join();
    node.stop();

    Ok(())
}
