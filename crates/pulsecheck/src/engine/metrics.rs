// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Intake-path counters.
//!
//! Backpressure on the packet channel is resolved by dropping, so operators
//! need visibility into how much the intake path is shedding. All counters
//! use relaxed atomics; they are diagnostics, not synchronization.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the receive loop and worker pool.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Datagrams accepted by `recv_from`, regardless of validity.
    pub packets_received: AtomicU64,
    /// Total payload bytes received.
    pub bytes_received: AtomicU64,
    /// Datagrams dropped because their length was not exactly one frame.
    pub dropped_malformed: AtomicU64,
    /// Datagrams dropped because the packet channel was full.
    pub dropped_queue_full: AtomicU64,
    /// Frames rejected by the codec (checksum mismatch).
    pub decode_failures: AtomicU64,
    /// Receive-loop iterations that found the buffer pool empty.
    pub pool_exhausted: AtomicU64,
    /// Outbound `send_to` calls that failed for one destination.
    pub send_failures: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub dropped_malformed: u64,
    pub dropped_queue_full: u64,
    pub decode_failures: u64,
    pub pool_exhausted: u64,
    pub send_failures: u64,
}

impl EngineMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy all counters at once (each read individually; not atomic as a set).
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            dropped_queue_full: self.dropped_queue_full.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            pool_exhausted: self.pool_exhausted.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}
