// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node configuration.
//!
//! Defaults match the CLI defaults; container deployments override through
//! the environment (`PORT`, `HEARTBEAT_INTERVAL`, `TIMEOUT`, `NODE_ID`,
//! `SEED_NODE`). Durations accept humantime forms such as `5s` or `100ms`.

use crate::engine::DEFAULT_PORT;
use crate::telemetry::Thresholds;
use crate::{Error, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Runtime configuration for one PulseCheck node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address to bind to (default: 0.0.0.0).
    pub bind_address: IpAddr,
    /// UDP port to listen on. Port 0 asks the OS for an ephemeral port.
    pub port: u16,
    /// Time between heartbeat broadcasts.
    pub heartbeat_interval: Duration,
    /// Silence after which a peer is considered offline.
    pub timeout: Duration,
    /// Reaper pass interval.
    pub reaper_tick: Duration,
    /// Status report interval.
    pub report_interval: Duration,
    /// Identity string; the hostname is used when absent.
    pub node_id: Option<String>,
    /// Initial peer address to bootstrap the address book.
    pub seed_node: Option<String>,
    /// Emit status reports as JSON instead of human-readable text.
    pub json_output: bool,
    /// Severity classification thresholds.
    pub thresholds: Thresholds,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            heartbeat_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(15),
            reaper_tick: Duration::from_secs(1),
            report_interval: Duration::from_secs(10),
            node_id: None,
            seed_node: None,
            json_output: false,
            thresholds: Thresholds::default(),
        }
    }
}

impl NodeConfig {
    /// Full socket address to bind the engine to.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Reject configurations the runtime cannot honor.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for zero intervals or inverted thresholds.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(Error::Config("heartbeat interval cannot be zero".into()));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout cannot be zero".into()));
        }
        if self.reaper_tick.is_zero() {
            return Err(Error::Config("reaper tick cannot be zero".into()));
        }
        if self.report_interval.is_zero() {
            return Err(Error::Config("report interval cannot be zero".into()));
        }

        let t = &self.thresholds;
        for (label, warn, critical) in [
            ("cpu", t.cpu_warn, t.cpu_critical),
            ("ram", t.ram_warn, t.ram_critical),
            ("disk", t.disk_warn, t.disk_critical),
        ] {
            if warn > critical {
                return Err(Error::Config(format!(
                    "{label} warn threshold {warn} exceeds critical threshold {critical}"
                )));
            }
        }
        Ok(())
    }

    /// Apply container-style environment overrides. Unset or empty variables
    /// are ignored; present-but-invalid values are a startup error.
    ///
    /// # Errors
    /// Returns [`Error::Config`] when a set variable fails to parse.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_var("PORT") {
            self.port = value
                .parse()
                .map_err(|_| Error::Config(format!("PORT={value:?} is not a valid port")))?;
        }
        if let Some(value) = env_var("HEARTBEAT_INTERVAL") {
            self.heartbeat_interval = humantime::parse_duration(&value).map_err(|_| {
                Error::Config(format!("HEARTBEAT_INTERVAL={value:?} is not a duration"))
            })?;
        }
        if let Some(value) = env_var("TIMEOUT") {
            self.timeout = humantime::parse_duration(&value)
                .map_err(|_| Error::Config(format!("TIMEOUT={value:?} is not a duration")))?;
        }
        if let Some(value) = env_var("NODE_ID") {
            self.node_id = Some(value);
        }
        if let Some(value) = env_var("SEED_NODE") {
            self.seed_node = Some(value);
        }
        Ok(())
    }
}

/// Read a variable, treating empty as absent.
fn env_var(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.timeout, Duration::from_secs(15));
        assert_eq!(config.reaper_tick, Duration::from_secs(1));
        assert!(config.seed_node.is_none());
        assert!(!config.json_output);
        assert!(config.validate().is_ok());
        assert_eq!(config.socket_addr().to_string(), "0.0.0.0:9999");
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let config = NodeConfig {
            heartbeat_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = NodeConfig {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let mut config = NodeConfig::default();
        config.thresholds.ram_warn = 99.0;
        config.thresholds.ram_critical = 95.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        // Single test so the process environment is mutated serially.
        std::env::set_var("PORT", "12345");
        std::env::set_var("HEARTBEAT_INTERVAL", "250ms");
        std::env::set_var("TIMEOUT", "3s");
        std::env::set_var("NODE_ID", "env-node");
        std::env::set_var("SEED_NODE", "");

        let mut config = NodeConfig::default();
        config.apply_env().expect("overrides parse");

        assert_eq!(config.port, 12345);
        assert_eq!(config.heartbeat_interval, Duration::from_millis(250));
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.node_id.as_deref(), Some("env-node"));
        // Empty means omitted.
        assert!(config.seed_node.is_none());

        std::env::set_var("PORT", "not-a-port");
        assert!(config.apply_env().is_err());

        for name in ["PORT", "HEARTBEAT_INTERVAL", "TIMEOUT", "NODE_ID", "SEED_NODE"] {
            std::env::remove_var(name);
        }
    }
}
