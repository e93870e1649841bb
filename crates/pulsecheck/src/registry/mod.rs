// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sharded concurrent peer registry with a liveness reaper.
//!
//! The registry maps a peer's wire address (`"host:port"` as observed on the
//! datagram) to its last-seen record. A single global lock would serialize
//! every inbound packet against every reader, so the map is striped across
//! [`SHARD_COUNT`] shards selected by an FNV-1a hash of the address. Locking
//! one shard at a time bounds worst-case hold time and keeps the reaper from
//! starving receive traffic.
//!
//! Consistency: per-peer updates are linearizable under that peer's shard
//! lock. [`Registry::snapshot`] and [`Registry::count`] visit shards one at a
//! time and are only weakly consistent - a reaper pass may interleave between
//! shards.

use crate::telemetry::Severity;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Number of shards. Power of two so shard selection is a bitwise mask.
pub const SHARD_COUNT: usize = 16;

const FNV1A_OFFSET_BASIS_32: u32 = 0x811c_9dc5;
const FNV1A_PRIME_32: u32 = 0x0100_0193;

/// FNV-1a over the address bytes; stable and well-avalanched on short ASCII.
fn fnv1a_32(s: &str) -> u32 {
    let mut hash = FNV1A_OFFSET_BASIS_32;
    for &byte in s.as_bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV1A_PRIME_32);
    }
    hash
}

/// Everything the registry knows about one peer.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    /// Local clock at receipt of the most recent valid frame. Always the
    /// receiver's clock, never derived from the sender's timestamp, so reaper
    /// decisions are immune to cross-node clock skew.
    pub last_seen: Instant,
    /// Datagram source address required to reach the peer.
    pub wire_address: String,
    /// Last severity observed.
    pub severity: Severity,
    /// Timestamp field of the last frame (kept for skew diagnostics).
    pub sender_timestamp: i64,
    /// Local metrics; populated only for the self-entry. Remote records stay
    /// at zero because the wire frame does not carry metrics.
    pub cpu_pct: f64,
    pub ram_pct: f64,
    pub disk_pct: f64,
    /// Reserved round-trip estimate. Heartbeats are one-way, so this stays
    /// zero; `now - sender_timestamp` is dominated by clock skew and must not
    /// be used in its place.
    pub rtt: Duration,
}

impl PeerRecord {
    fn new(addr: &str) -> Self {
        Self {
            last_seen: Instant::now(),
            wire_address: addr.to_string(),
            severity: Severity::Ok,
            sender_timestamp: 0,
            cpu_pct: 0.0,
            ram_pct: 0.0,
            disk_pct: 0.0,
            rtt: Duration::ZERO,
        }
    }

    /// Age of this record against the local clock.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.last_seen.elapsed()
    }
}

struct Shard {
    nodes: RwLock<HashMap<String, PeerRecord>>,
}

impl Shard {
    fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
        }
    }
}

/// Sharded map of peer address to last-seen record.
pub struct Registry {
    shards: Vec<Shard>,
    evictions: AtomicU64,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Shard::new()).collect(),
            evictions: AtomicU64::new(0),
        }
    }

    fn shard(&self, addr: &str) -> &Shard {
        let index = (fnv1a_32(addr) as usize) & (SHARD_COUNT - 1);
        &self.shards[index]
    }

    /// Create or refresh the record's `last_seen`; severity and metrics are
    /// left untouched.
    pub fn update_seen(&self, addr: &str) {
        let mut nodes = self.shard(addr).nodes.write();
        let record = nodes
            .entry(addr.to_string())
            .or_insert_with(|| PeerRecord::new(addr));
        record.last_seen = Instant::now();
    }

    /// Refresh `last_seen` and overwrite severity and the sender's timestamp.
    /// Used by the receive path for every valid inbound frame.
    pub fn update_with_severity(&self, addr: &str, severity: Severity, sender_timestamp: i64) {
        let mut nodes = self.shard(addr).nodes.write();
        let record = nodes
            .entry(addr.to_string())
            .or_insert_with(|| PeerRecord::new(addr));
        record.last_seen = Instant::now();
        record.severity = severity;
        record.sender_timestamp = sender_timestamp;
    }

    /// Refresh `last_seen` and overwrite all metric fields and severity.
    /// Used only by the orchestrator for its own self-entry.
    pub fn update_with_telemetry(
        &self,
        addr: &str,
        cpu_pct: f64,
        ram_pct: f64,
        disk_pct: f64,
        severity: Severity,
    ) {
        let mut nodes = self.shard(addr).nodes.write();
        let record = nodes
            .entry(addr.to_string())
            .or_insert_with(|| PeerRecord::new(addr));
        record.last_seen = Instant::now();
        record.cpu_pct = cpu_pct;
        record.ram_pct = ram_pct;
        record.disk_pct = disk_pct;
        record.severity = severity;
    }

    /// Look up a single peer.
    #[must_use]
    pub fn get(&self, addr: &str) -> Option<PeerRecord> {
        self.shard(addr).nodes.read().get(addr).cloned()
    }

    /// Copy out every record, one shard read lock at a time.
    ///
    /// Not atomic across shards: a concurrent update or reaper pass may be
    /// reflected in some shards and not others.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, PeerRecord> {
        let mut result = HashMap::new();
        for shard in &self.shards {
            let nodes = shard.nodes.read();
            for (addr, record) in nodes.iter() {
                result.insert(addr.clone(), record.clone());
            }
        }
        result
    }

    /// Total number of records, with the same weak-consistency caveat as
    /// [`Registry::snapshot`].
    #[must_use]
    pub fn count(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.nodes.read().len())
            .sum()
    }

    /// Total evictions performed by the reaper since startup.
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// One reaper pass: per shard, under its write lock, delete every record
    /// older than `timeout`. Returns how many records were evicted.
    pub fn reap_once(&self, timeout: Duration) -> usize {
        let mut evicted = 0usize;
        for shard in &self.shards {
            let mut nodes = shard.nodes.write();
            nodes.retain(|addr, record| {
                if record.last_seen.elapsed() > timeout {
                    info!(peer = %addr, "peer timed out, evicting");
                    evicted += 1;
                    false
                } else {
                    true
                }
            });
        }
        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        }
        evicted
    }

    /// Spawn the reaper ticker thread. It runs one pass every `tick` until
    /// `stop` is signalled or disconnected.
    ///
    /// # Errors
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        tick: Duration,
        timeout: Duration,
        stop: Receiver<()>,
    ) -> std::io::Result<JoinHandle<()>> {
        let registry = Arc::clone(self);
        std::thread::Builder::new()
            .name("pulse-reaper".to_string())
            .spawn(move || loop {
                match stop.recv_timeout(tick) {
                    Err(RecvTimeoutError::Timeout) => {
                        registry.reap_once(timeout);
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        debug!("reaper shutting down");
                        break;
                    }
                }
            })
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
