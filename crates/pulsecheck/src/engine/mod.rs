// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP engine: socket ownership, receive loop, worker fanout, broadcast.
//!
//! # Architecture
//!
//! ```text
//! UDP recv_from (pulse-rx thread)
//!       v
//! RecvBufferPool borrow -> copy 30 octets -> release
//!       v
//! bounded packet channel (capacity 2 x workers, try_send)
//!       v
//! pulse-worker-N: decode -> address book insert -> registry update
//! ```
//!
//! One unconnected socket serves both directions: the receive loop reads
//! from it and broadcast writes to it (`send_to`/`recv_from` are thread-safe
//! at the OS level, no user-space lock needed).
//!
//! Backpressure is resolved by dropping: when the packet channel is full the
//! datagram is discarded and counted rather than blocking the receive loop.
//! Blocking would let the kernel socket buffer overflow and drop on our
//! behalf without visibility.
//!
//! # State machine
//!
//! ```text
//! New --start()--> Running --stop()--> Draining --workers exit--> Stopped
//! ```

pub mod metrics;
pub mod pool;

pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use pool::RecvBufferPool;

use crate::protocol::{Frame, FRAME_SIZE};
use crate::registry::Registry;
use crate::telemetry::Severity;
use crate::{Error, Result};
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default heartbeat port.
pub const DEFAULT_PORT: u16 = 9999;

/// Receive buffers kept in the pool. The loop returns each buffer right
/// after copying the payload out, so a small pool is plenty.
const RECV_POOL_CAPACITY: usize = 32;

/// Read timeout on the socket so the receive loop can observe the stop flag
/// between receives even on a quiet wire.
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Engine lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    New = 0,
    Running = 1,
    /// Receive loop has exited and the packet channel is closed; workers are
    /// draining what remains.
    Draining = 2,
    Stopped = 3,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::New,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// One packet handed from the receive loop to a worker.
struct PacketJob {
    data: [u8; FRAME_SIZE],
    source: SocketAddr,
}

/// UDP heartbeat engine.
///
/// Owns the socket and the peer address book; shares the registry with the
/// orchestrator. All long-lived threads observe one stop signal: the receive
/// loop checks the flag between receives, workers observe it through packet
/// channel closure.
pub struct UdpEngine {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    node_id: [u8; 16],
    registry: Arc<Registry>,
    peers: Arc<RwLock<HashMap<String, SocketAddr>>>,
    metrics: Arc<EngineMetrics>,
    state: AtomicU8,
    running: Arc<AtomicBool>,
    worker_count: usize,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl UdpEngine {
    /// Bind the engine socket.
    ///
    /// The socket is created unconnected so it can both `recv_from` and
    /// `send_to`, with `SO_REUSEADDR` set for fast restart.
    ///
    /// # Errors
    /// Returns [`Error::Bind`] when the address cannot be bound; this is the
    /// one fatal startup error.
    pub fn bind(bind_addr: SocketAddr, node_id: [u8; 16], registry: Arc<Registry>) -> Result<Self> {
        let socket = Self::create_socket(bind_addr).map_err(|source| Error::Bind {
            addr: bind_addr.to_string(),
            source,
        })?;
        let local_addr = socket.local_addr()?;
        info!(addr = %local_addr, "UDP engine bound");

        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
            node_id,
            registry,
            peers: Arc::new(RwLock::new(HashMap::new())),
            metrics: Arc::new(EngineMetrics::new()),
            state: AtomicU8::new(EngineState::New as u8),
            running: Arc::new(AtomicBool::new(false)),
            worker_count: std::cmp::max(num_cpus::get(), 2),
            threads: Mutex::new(Vec::new()),
        })
    }

    fn create_socket(bind_addr: SocketAddr) -> io::Result<UdpSocket> {
        let socket = Socket::new(
            Domain::for_address(bind_addr),
            Type::DGRAM,
            Some(Protocol::UDP),
        )?;
        socket.set_reuse_address(true)?;
        socket.bind(&bind_addr.into())?;

        let socket: UdpSocket = socket.into();
        socket.set_read_timeout(Some(RECV_POLL_INTERVAL))?;
        Ok(socket)
    }

    /// Start the receive loop and the worker pool.
    ///
    /// # Errors
    /// Returns [`Error::EngineState`] if the engine is not in `New` state.
    pub fn start(&self) -> Result<()> {
        self.state
            .compare_exchange(
                EngineState::New as u8,
                EngineState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|actual| Error::EngineState(EngineState::from_u8(actual), EngineState::New))?;

        self.running.store(true, Ordering::SeqCst);

        // Capacity 2 x workers: enough headroom for traffic spikes without
        // letting a stalled worker pool accumulate unbounded memory.
        let (packet_tx, packet_rx) = bounded::<PacketJob>(self.worker_count * 2);

        let mut threads = self.threads.lock();
        for worker in 0..self.worker_count {
            let rx = packet_rx.clone();
            let registry = Arc::clone(&self.registry);
            let peers = Arc::clone(&self.peers);
            let metrics = Arc::clone(&self.metrics);
            let handle = std::thread::Builder::new()
                .name(format!("pulse-worker-{worker}"))
                .spawn(move || worker_loop(&rx, &registry, &peers, &metrics))
                .map_err(Error::Io)?;
            threads.push(handle);
        }

        let socket = Arc::clone(&self.socket);
        let running = Arc::clone(&self.running);
        let metrics = Arc::clone(&self.metrics);
        let handle = std::thread::Builder::new()
            .name("pulse-rx".to_string())
            .spawn(move || recv_loop(&socket, &running, &metrics, &packet_tx))
            .map_err(Error::Io)?;
        threads.push(handle);

        info!(workers = self.worker_count, addr = %self.local_addr, "UDP engine started");
        Ok(())
    }

    /// Stop the engine: the receive loop exits, the packet channel closes,
    /// workers drain and exit. Idempotent; a second call is a no-op.
    pub fn stop(&self) {
        if self
            .state
            .compare_exchange(
                EngineState::Running as u8,
                EngineState::Draining as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }

        self.running.store(false, Ordering::SeqCst);
        let handles: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        self.state.store(EngineState::Stopped as u8, Ordering::SeqCst);
        info!("UDP engine stopped");
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Address the socket is actually bound to (useful with port 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Intake counters.
    #[must_use]
    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Number of known outbound peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    /// Resolve and add a peer to the address book without sending anything.
    ///
    /// # Errors
    /// Returns [`Error::SeedResolve`] when the address does not resolve.
    pub fn add_peer(&self, addr_str: &str) -> Result<SocketAddr> {
        let addr = resolve_peer(addr_str)?;
        self.peers.write().insert(addr.to_string(), addr);
        Ok(addr)
    }

    /// Encode one heartbeat and send it to every known peer.
    ///
    /// Per-destination failures are logged and swallowed - one bad peer must
    /// not block the others. An empty address book is a no-op. Returns the
    /// number of successful sends.
    pub fn broadcast(&self, severity: Severity) -> usize {
        let targets: Vec<SocketAddr> = self.peers.read().values().copied().collect();
        if targets.is_empty() {
            return 0;
        }

        let bytes = Frame::new(self.node_id, severity).encode();
        let mut sent = 0;
        for addr in targets {
            match self.socket.send_to(&bytes, addr) {
                Ok(_) => sent += 1,
                Err(err) => {
                    self.metrics.send_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(peer = %addr, %err, "heartbeat send failed");
                }
            }
        }
        sent
    }

    /// Resolve a seed address, send one heartbeat to it, and add it to the
    /// address book on success.
    ///
    /// # Errors
    /// [`Error::SeedResolve`] for an unresolvable address, [`Error::Io`] when
    /// the single send fails.
    pub fn send_to_seed(&self, seed: &str, severity: Severity) -> Result<()> {
        let addr = resolve_peer(seed)?;
        let bytes = Frame::new(self.node_id, severity).encode();
        self.socket.send_to(&bytes, addr)?;
        self.peers.write().insert(addr.to_string(), addr);
        debug!(seed = %addr, "seed heartbeat sent");
        Ok(())
    }
}

impl Drop for UdpEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn resolve_peer(addr_str: &str) -> Result<SocketAddr> {
    addr_str
        .to_socket_addrs()
        .map_err(|_| Error::SeedResolve(addr_str.to_string()))?
        .next()
        .ok_or_else(|| Error::SeedResolve(addr_str.to_string()))
}

/// Receive loop body (single `pulse-rx` thread).
///
/// Borrow a pooled buffer, read one datagram, hand a copied payload to the
/// workers, return the buffer. I/O errors are not fatal; mis-sized datagrams
/// are dropped silently (counted); a full channel drops the packet rather
/// than blocking the drain of the kernel socket buffer.
fn recv_loop(
    socket: &UdpSocket,
    running: &AtomicBool,
    metrics: &EngineMetrics,
    packet_tx: &Sender<PacketJob>,
) {
    let mut pool = RecvBufferPool::new(RECV_POOL_CAPACITY);

    while running.load(Ordering::Relaxed) {
        let Some(id) = pool.acquire() else {
            metrics.pool_exhausted.fetch_add(1, Ordering::Relaxed);
            std::thread::sleep(Duration::from_millis(1));
            continue;
        };

        let received = socket.recv_from(pool.buffer_mut(id));
        let (len, source) = match received {
            Ok(ok) => ok,
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                pool.release(id);
                continue;
            }
            Err(err) => {
                debug!(%err, "transient recv error");
                pool.release(id);
                continue;
            }
        };

        metrics.packets_received.fetch_add(1, Ordering::Relaxed);
        metrics
            .bytes_received
            .fetch_add(len as u64, Ordering::Relaxed);

        if len != FRAME_SIZE {
            metrics.dropped_malformed.fetch_add(1, Ordering::Relaxed);
            pool.release(id);
            continue;
        }

        let mut data = [0u8; FRAME_SIZE];
        data.copy_from_slice(&pool.buffer(id)[..FRAME_SIZE]);
        pool.release(id);

        match packet_tx.try_send(PacketJob { data, source }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                metrics.dropped_queue_full.fetch_add(1, Ordering::Relaxed);
                info!(peer = %source, "packet channel full, dropping heartbeat");
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
    // Dropping the last sender closes the channel; workers drain and exit.
}

/// Worker body: decode, record the peer, update the registry.
fn worker_loop(
    packet_rx: &Receiver<PacketJob>,
    registry: &Registry,
    peers: &RwLock<HashMap<String, SocketAddr>>,
    metrics: &EngineMetrics,
) {
    for job in packet_rx.iter() {
        match Frame::decode(&job.data) {
            Err(err) => {
                metrics.decode_failures.fetch_add(1, Ordering::Relaxed);
                info!(peer = %job.source, %err, "dropping corrupt heartbeat");
            }
            Ok(frame) => {
                let addr = job.source.to_string();
                peers.write().insert(addr.clone(), job.source);
                registry.update_with_severity(&addr, frame.severity(), frame.timestamp);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn loopback_engine(registry: Arc<Registry>) -> UdpEngine {
        let addr: SocketAddr = "127.0.0.1:0".parse().expect("valid loopback addr");
        UdpEngine::bind(addr, [0x11; 16], registry).expect("bind on ephemeral port")
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    #[test]
    fn test_state_machine_transitions() {
        let engine = loopback_engine(Arc::new(Registry::new()));
        assert_eq!(engine.state(), EngineState::New);

        engine.start().expect("first start succeeds");
        assert_eq!(engine.state(), EngineState::Running);

        assert!(matches!(engine.start(), Err(Error::EngineState(..))));

        engine.stop();
        assert_eq!(engine.state(), EngineState::Stopped);
        engine.stop(); // idempotent
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn test_broadcast_with_empty_book_is_noop() {
        let engine = loopback_engine(Arc::new(Registry::new()));
        assert_eq!(engine.broadcast(Severity::Ok), 0);
    }

    #[test]
    fn test_broadcast_reaches_peer_registry() {
        let registry_a = Arc::new(Registry::new());
        let registry_b = Arc::new(Registry::new());
        let engine_a = loopback_engine(Arc::clone(&registry_a));
        let engine_b = loopback_engine(Arc::clone(&registry_b));

        engine_a.start().expect("engine a starts");
        engine_b.start().expect("engine b starts");

        engine_a
            .add_peer(&engine_b.local_addr().to_string())
            .expect("peer resolves");
        assert_eq!(engine_a.broadcast(Severity::Warn), 1);

        let a_addr = engine_a.local_addr().to_string();
        assert!(
            wait_until(Duration::from_secs(2), || registry_b.get(&a_addr).is_some()),
            "peer b never observed a's heartbeat"
        );
        let record = registry_b.get(&a_addr).expect("record present");
        assert_eq!(record.severity, Severity::Warn);
        // Remote records never carry metrics; the wire frame has none.
        assert_eq!(record.cpu_pct, 0.0);

        engine_a.stop();
        engine_b.stop();
    }

    #[test]
    fn test_send_to_seed_populates_address_book() {
        let registry_a = Arc::new(Registry::new());
        let engine_a = loopback_engine(Arc::clone(&registry_a));
        let engine_b = loopback_engine(Arc::new(Registry::new()));

        engine_a.start().expect("engine a starts");

        assert_eq!(engine_b.peer_count(), 0);
        engine_b
            .send_to_seed(&engine_a.local_addr().to_string(), Severity::Ok)
            .expect("seed send succeeds");
        assert_eq!(engine_b.peer_count(), 1);

        let b_addr = engine_b.local_addr().to_string();
        assert!(
            wait_until(Duration::from_secs(2), || registry_a.get(&b_addr).is_some()),
            "seed never observed the bootstrap heartbeat"
        );

        engine_a.stop();
        engine_b.stop();
    }

    #[test]
    fn test_unresolvable_seed_is_rejected() {
        let engine = loopback_engine(Arc::new(Registry::new()));
        assert!(matches!(
            engine.send_to_seed("not-an-address", Severity::Ok),
            Err(Error::SeedResolve(_))
        ));
        assert_eq!(engine.peer_count(), 0);
    }

    #[test]
    fn test_short_datagram_dropped_silently() {
        let registry = Arc::new(Registry::new());
        let engine = loopback_engine(Arc::clone(&registry));
        engine.start().expect("engine starts");

        let sender = UdpSocket::bind("127.0.0.1:0").expect("sender socket");
        sender
            .send_to(&[0u8; 5], engine.local_addr())
            .expect("send short datagram");

        assert!(
            wait_until(Duration::from_secs(2), || {
                engine.metrics().snapshot().dropped_malformed == 1
            }),
            "malformed drop was not counted"
        );
        assert_eq!(registry.count(), 0);
        assert_eq!(engine.metrics().snapshot().decode_failures, 0);

        engine.stop();
    }

    #[test]
    fn test_corrupt_frame_counted_and_discarded() {
        let registry = Arc::new(Registry::new());
        let engine = loopback_engine(Arc::clone(&registry));
        engine.start().expect("engine starts");

        // Right length, garbage contents: the checksum cannot match.
        let sender = UdpSocket::bind("127.0.0.1:0").expect("sender socket");
        sender
            .send_to(&[0xA5u8; FRAME_SIZE], engine.local_addr())
            .expect("send corrupt frame");

        assert!(
            wait_until(Duration::from_secs(2), || {
                engine.metrics().snapshot().decode_failures == 1
            }),
            "decode failure was not counted"
        );
        assert_eq!(registry.count(), 0);
        assert_eq!(engine.peer_count(), 0);

        engine.stop();
    }

    #[test]
    fn test_valid_frame_learns_peer_address() {
        let registry = Arc::new(Registry::new());
        let engine = loopback_engine(Arc::clone(&registry));
        engine.start().expect("engine starts");

        let sender = UdpSocket::bind("127.0.0.1:0").expect("sender socket");
        let frame = Frame::new([0x22; 16], Severity::Critical);
        sender
            .send_to(&frame.encode(), engine.local_addr())
            .expect("send valid frame");

        let sender_addr = sender.local_addr().expect("sender addr").to_string();
        assert!(
            wait_until(Duration::from_secs(2), || registry.get(&sender_addr).is_some()),
            "valid frame was not applied to the registry"
        );
        assert_eq!(engine.peer_count(), 1);
        let record = registry.get(&sender_addr).expect("record present");
        assert_eq!(record.severity, Severity::Critical);
        assert_eq!(record.sender_timestamp, frame.timestamp);

        engine.stop();
    }
}
