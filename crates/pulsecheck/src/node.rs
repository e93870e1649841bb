// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node orchestrator.
//!
//! Owns the process-wide lifetime of the registry, the UDP engine, and the
//! two tickers (heartbeat and reaper). Every background thread is
//! parameterized by one stop signal: dropping the sender disconnects all
//! ticker receivers, and the engine carries its own flag.
//!
//! The orchestrator writes its own telemetry into the registry under the
//! socket's local address (the self-entry). When the OS reports a wildcard
//! address, that entry simply never collides with a peer-observed one; the
//! two are deliberately not merged.

use crate::config::NodeConfig;
use crate::engine::UdpEngine;
use crate::registry::Registry;
use crate::telemetry::{classify, TelemetrySampler, Thresholds};
use crate::Result;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use rand::rngs::OsRng;
use rand::RngCore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Derive the 16-octet node identity from an identity string.
///
/// The first 16 UTF-8 bytes are copied verbatim; any remaining octets are
/// filled from the OS RNG. Short identities therefore stay globally unique
/// across independent processes, while identities of 16 bytes or more are
/// deterministic per input.
#[must_use]
pub fn derive_node_id(source: &str) -> [u8; 16] {
    let mut id = [0u8; 16];
    let bytes = source.as_bytes();
    let copied = bytes.len().min(16);
    id[..copied].copy_from_slice(&bytes[..copied]);
    if copied < 16 {
        OsRng.fill_bytes(&mut id[copied..]);
    }
    id
}

/// A running PulseCheck node.
pub struct Node {
    config: NodeConfig,
    node_id: [u8; 16],
    registry: Arc<Registry>,
    engine: Arc<UdpEngine>,
    sampler: Option<Box<dyn TelemetrySampler + Send>>,
    stop_tx: Option<Sender<()>>,
    threads: Vec<JoinHandle<()>>,
}

impl Node {
    /// Validate the configuration and bind the engine socket.
    ///
    /// # Errors
    /// [`crate::Error::Config`] for a rejected configuration,
    /// [`crate::Error::Bind`] when the UDP socket cannot be bound (fatal).
    pub fn bind(config: NodeConfig, sampler: Box<dyn TelemetrySampler + Send>) -> Result<Self> {
        config.validate()?;

        let identity = config
            .node_id
            .clone()
            .or_else(hostname)
            .unwrap_or_else(|| "unknown".to_string());
        let node_id = derive_node_id(&identity);

        let registry = Arc::new(Registry::new());
        let engine = Arc::new(UdpEngine::bind(
            config.socket_addr(),
            node_id,
            Arc::clone(&registry),
        )?);

        info!(
            identity = %identity,
            node_id = %hex(&node_id),
            addr = %engine.local_addr(),
            "node bound"
        );

        Ok(Self {
            config,
            node_id,
            registry,
            engine,
            sampler: Some(sampler),
            stop_tx: None,
            threads: Vec::new(),
        })
    }

    /// Start the engine, the reaper, the seed bootstrap, and the heartbeat
    /// ticker.
    ///
    /// # Errors
    /// Propagates engine start failures; seed failures are logged and
    /// startup continues.
    pub fn start(&mut self) -> Result<()> {
        self.engine.start()?;

        let (stop_tx, stop_rx) = bounded::<()>(0);
        self.stop_tx = Some(stop_tx);

        self.threads.push(self.registry.spawn_reaper(
            self.config.reaper_tick,
            self.config.timeout,
            stop_rx.clone(),
        )?);

        let mut sampler = self.sampler.take().expect("sampler consumed on start");

        if let Some(seed) = self.config.seed_node.clone() {
            self.bootstrap_seed(&seed, sampler.as_mut());
        }

        self.threads.push(spawn_heartbeat(
            self.config.heartbeat_interval,
            self.config.thresholds,
            sampler,
            Arc::clone(&self.registry),
            Arc::clone(&self.engine),
            stop_rx,
        )?);

        info!(
            interval = ?self.config.heartbeat_interval,
            timeout = ?self.config.timeout,
            "node started"
        );
        Ok(())
    }

    /// One-shot seed announcement. A failed sample skips the announcement
    /// (never announce a severity that was not measured); a failed send is
    /// logged and startup continues either way.
    fn bootstrap_seed(&self, seed: &str, sampler: &mut (dyn TelemetrySampler + Send)) {
        let severity = match sampler.sample() {
            Ok(metrics) => classify(&metrics, &self.config.thresholds),
            Err(err) => {
                warn!(%err, seed, "telemetry sample failed, skipping seed announcement");
                return;
            }
        };

        match self.engine.send_to_seed(seed, severity) {
            Ok(()) => info!(seed, "seed announced"),
            Err(err) => warn!(%err, seed, "seed announcement failed, continuing without seed"),
        }
    }

    /// Orderly shutdown: tickers first, then the engine (receive loop,
    /// channel closure, worker drain). Idempotent.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            drop(stop_tx);
        }
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        self.engine.stop();
        info!("node stopped");
    }

    /// Shared peer registry handle (for the reporter).
    #[must_use]
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Shared engine handle.
    #[must_use]
    pub fn engine(&self) -> Arc<UdpEngine> {
        Arc::clone(&self.engine)
    }

    /// Bound socket address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.engine.local_addr()
    }

    /// This node's 16-octet wire identity.
    #[must_use]
    pub fn node_id(&self) -> [u8; 16] {
        self.node_id
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Heartbeat ticker thread: sample, classify, write the self-entry,
/// broadcast. A failed sample skips the whole tick so stale data is never
/// broadcast.
fn spawn_heartbeat(
    interval: Duration,
    thresholds: Thresholds,
    mut sampler: Box<dyn TelemetrySampler + Send>,
    registry: Arc<Registry>,
    engine: Arc<UdpEngine>,
    stop: Receiver<()>,
) -> std::io::Result<JoinHandle<()>> {
    let local_addr = engine.local_addr().to_string();
    std::thread::Builder::new()
        .name("pulse-heartbeat".to_string())
        .spawn(move || loop {
            match stop.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    heartbeat_tick(
                        sampler.as_mut(),
                        &thresholds,
                        &registry,
                        &engine,
                        &local_addr,
                    );
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    debug!("heartbeat ticker shutting down");
                    break;
                }
            }
        })
}

fn heartbeat_tick(
    sampler: &mut (dyn TelemetrySampler + Send),
    thresholds: &Thresholds,
    registry: &Registry,
    engine: &UdpEngine,
    local_addr: &str,
) {
    let metrics = match sampler.sample() {
        Ok(metrics) => metrics,
        Err(err) => {
            warn!(%err, "telemetry sample failed, skipping heartbeat");
            return;
        }
    };

    let severity = classify(&metrics, thresholds);
    registry.update_with_telemetry(
        local_addr,
        metrics.cpu_pct,
        metrics.ram_pct,
        metrics.disk_pct,
        severity,
    );

    let sent = engine.broadcast(severity);
    debug!(%severity, peers = sent, "heartbeat broadcast");
}

fn hostname() -> Option<String> {
    sysinfo::System::host_name()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
