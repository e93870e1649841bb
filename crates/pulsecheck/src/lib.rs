// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # PulseCheck - Decentralized node-health monitor
//!
//! Every participating node periodically samples local resource pressure
//! (CPU, RAM, disk), condenses it into a single severity code, and announces
//! itself to its peers with a fixed-size UDP heartbeat. Each node is both a
//! sender and a receiver: it keeps an in-memory registry of every peer it has
//! heard from and expires entries that have gone silent past a timeout.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pulsecheck::config::NodeConfig;
//! use pulsecheck::node::Node;
//! use pulsecheck::telemetry::SystemSampler;
//!
//! fn main() -> pulsecheck::Result<()> {
//!     let config = NodeConfig::default();
//!     let mut node = Node::bind(config, Box::new(SystemSampler::new()))?;
//!     node.start()?;
//!     // ... wait for a shutdown signal ...
//!     node.stop();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                        Node orchestrator                           |
//! |   identity | seed bootstrap | heartbeat ticker | shutdown wiring   |
//! +--------------------------------------------------------------------+
//! |                           UDP engine                               |
//! |   recv loop -> buffer pool -> packet channel -> worker fanout      |
//! |   peer address book | broadcast | per-peer sendto                  |
//! +--------------------------------------------------------------------+
//! |                          Peer registry                             |
//! |   16 lock-striped shards | last-seen records | reaper ticker       |
//! +--------------------------------------------------------------------+
//! |                  Frame codec / severity classifier                 |
//! |   30-octet heartbeat frame, CRC-32 | metrics -> OK/WARN/CRITICAL   |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Wire Format
//!
//! One heartbeat is exactly 30 octets, big-endian, no handshake and no
//! acknowledgement (see [`protocol`]). Delivery is best effort: a lost
//! heartbeat only delays the peer's `last_seen` refresh.

pub mod config;
/// UDP socket ownership, receive loop, worker fanout, and broadcast.
pub mod engine;
/// Node orchestrator: identity, tickers, seed bootstrap, shutdown.
pub mod node;
/// Heartbeat frame encode/decode with CRC-32 integrity check.
pub mod protocol;
/// Sharded concurrent peer registry and its reaper.
pub mod registry;
/// Periodic human/JSON status output.
pub mod report;
/// Resource metrics, thresholds, severity classification, sampling.
pub mod telemetry;

pub use config::NodeConfig;
pub use engine::UdpEngine;
pub use node::Node;
pub use protocol::{Frame, FrameError};
pub use registry::{PeerRecord, Registry};
pub use telemetry::{classify, Metrics, Severity, Thresholds};

use thiserror::Error;

/// Errors returned by PulseCheck operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to bind the UDP socket at startup. Fatal.
    #[error("failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Seed address could not be resolved to a socket address.
    #[error("cannot resolve seed address {0:?}")]
    SeedResolve(String),

    /// Engine started twice or stopped before starting.
    #[error("engine is in state {0:?}, expected {1:?}")]
    EngineState(engine::EngineState, engine::EngineState),

    /// Underlying socket I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
