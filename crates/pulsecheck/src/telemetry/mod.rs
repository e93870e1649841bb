// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Resource metrics, severity classification, and local sampling.
//!
//! The classifier is a pure threshold ladder: any metric at or above its
//! critical threshold yields `Critical`, else any metric at or above its warn
//! threshold yields `Warn`, else `Ok`. Thresholds are inclusive. The sampler
//! sits behind [`TelemetrySampler`] so tests can substitute fixed readings.

use std::cmp::Ordering;
use std::time::Duration;
use sysinfo::{Disks, System};
use thiserror::Error;

/// Node health severity as carried in the heartbeat frame.
///
/// Total order with `Critical` highest; reserved wire codes decode to
/// `Unknown` and sort above `Critical` only to keep the order total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Ok,
    Warn,
    Critical,
    /// Reserved wire code observed from a peer; never produced by [`classify`].
    Unknown(u8),
}

impl Severity {
    /// Wire code for this severity.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Warn => 1,
            Self::Critical => 2,
            Self::Unknown(code) => code,
        }
    }

    /// Decode a wire code (reserved values map to `Unknown`).
    #[must_use]
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Warn,
            2 => Self::Critical,
            other => Self::Unknown(other),
        }
    }

    /// Human-readable status label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Warn => "WARN",
            Self::Critical => "CRITICAL",
            Self::Unknown(_) => "UNKNOWN",
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Warn => 1,
            Self::Critical => 2,
            Self::Unknown(_) => 3,
        }
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank()
            .cmp(&other.rank())
            .then_with(|| self.code().cmp(&other.code()))
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One sample of local resource pressure, each value in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Metrics {
    pub cpu_pct: f64,
    pub ram_pct: f64,
    pub disk_pct: f64,
}

/// Warn/critical thresholds for each metric, in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub cpu_warn: f64,
    pub cpu_critical: f64,
    pub ram_warn: f64,
    pub ram_critical: f64,
    pub disk_warn: f64,
    pub disk_critical: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_warn: 70.0,
            cpu_critical: 90.0,
            ram_warn: 80.0,
            ram_critical: 95.0,
            disk_warn: 85.0,
            disk_critical: 95.0,
        }
    }
}

/// Classify a metrics sample against thresholds.
///
/// Critical conditions are checked first so `Critical` always wins over
/// `Warn`; comparisons are inclusive (a value exactly at a threshold
/// triggers it). The function consults no time or state.
#[must_use]
pub fn classify(metrics: &Metrics, thresholds: &Thresholds) -> Severity {
    if metrics.cpu_pct >= thresholds.cpu_critical
        || metrics.ram_pct >= thresholds.ram_critical
        || metrics.disk_pct >= thresholds.disk_critical
    {
        return Severity::Critical;
    }

    if metrics.cpu_pct >= thresholds.cpu_warn
        || metrics.ram_pct >= thresholds.ram_warn
        || metrics.disk_pct >= thresholds.disk_warn
    {
        return Severity::Warn;
    }

    Severity::Ok
}

/// Error while sampling local telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TelemetryError {
    #[error("no disk information available")]
    NoDisks,
    #[error("memory totals unavailable")]
    NoMemory,
}

/// Source of local resource metrics.
///
/// The heartbeat loop owns its sampler exclusively, so sampling takes
/// `&mut self` and implementations may keep measurement state between calls.
pub trait TelemetrySampler {
    /// Take one sample. A failed sample skips the current heartbeat.
    fn sample(&mut self) -> Result<Metrics, TelemetryError>;
}

/// Sampler backed by the `sysinfo` crate.
///
/// CPU utilization needs two refreshes separated by the crate's minimum
/// measurement interval; the first call primes the counters and therefore
/// blocks briefly.
pub struct SystemSampler {
    system: System,
    disks: Disks,
    primed: bool,
}

impl SystemSampler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: System::new(),
            disks: Disks::new(),
            primed: false,
        }
    }

    fn disk_pct(&mut self) -> Result<f64, TelemetryError> {
        self.disks.refresh_list();

        // Prefer the root mount; fall back to the first disk reported.
        let disk = self
            .disks
            .list()
            .iter()
            .find(|d| d.mount_point() == std::path::Path::new("/"))
            .or_else(|| self.disks.list().first())
            .ok_or(TelemetryError::NoDisks)?;

        let total = disk.total_space();
        if total == 0 {
            return Err(TelemetryError::NoDisks);
        }
        let used = total.saturating_sub(disk.available_space());
        Ok(used as f64 / total as f64 * 100.0)
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySampler for SystemSampler {
    fn sample(&mut self) -> Result<Metrics, TelemetryError> {
        if !self.primed {
            self.system.refresh_cpu_usage();
            std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL.max(Duration::from_millis(1)));
            self.primed = true;
        }
        self.system.refresh_cpu_usage();
        let cpu_pct = f64::from(self.system.global_cpu_info().cpu_usage());

        self.system.refresh_memory();
        let total_mem = self.system.total_memory();
        if total_mem == 0 {
            return Err(TelemetryError::NoMemory);
        }
        let ram_pct = self.system.used_memory() as f64 / total_mem as f64 * 100.0;

        let disk_pct = self.disk_pct()?;

        Ok(Metrics {
            cpu_pct: cpu_pct.clamp(0.0, 100.0),
            ram_pct: ram_pct.clamp(0.0, 100.0),
            disk_pct: disk_pct.clamp(0.0, 100.0),
        })
    }
}
