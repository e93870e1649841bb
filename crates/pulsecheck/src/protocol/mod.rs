// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Heartbeat frame encoding and decoding.
//!
//! # Wire Format
//!
//! ```text
//! +---------+------------------+--------------+----------+------------+
//! | version | node_id          | timestamp    | severity | checksum   |
//! | (1)     | (16)             | (i64, BE)    | (1)      | (u32, BE)  |
//! +---------+------------------+--------------+----------+------------+
//! offset 0   1..16              17..24          25         26..29
//! ```
//!
//! - Total length is exactly [`FRAME_SIZE`] (30) octets.
//! - `timestamp` is signed nanoseconds since the Unix epoch at emission time.
//! - `checksum` is CRC-32/IEEE over octets `0..26`, stored big-endian.
//!
//! The frame is fixed-size so the receiver can reject mis-sized datagrams
//! before any parsing work; the CRC guards against in-flight corruption and
//! misdirected traffic on the same port. Big-endian layout keeps the wire
//! deterministic across architectures.

use crate::telemetry::Severity;
use thiserror::Error;

/// Total frame length on the wire.
pub const FRAME_SIZE: usize = 30;

/// Length of the checksummed portion (everything before the CRC).
pub const FRAME_DATA_SIZE: usize = 26;

/// Protocol version emitted by this implementation.
pub const PROTOCOL_VERSION: u8 = 1;

/// Error during frame decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Buffer length is not exactly [`FRAME_SIZE`].
    #[error("invalid frame length {0}, expected {FRAME_SIZE}")]
    BadLength(usize),
    /// Trailing CRC does not match the checksummed portion.
    #[error("frame checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    BadChecksum { stored: u32, computed: u32 },
}

/// A decoded (or to-be-encoded) heartbeat frame.
///
/// Instances returned by [`Frame::decode`] always carry a validated checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Protocol version (this implementation emits [`PROTOCOL_VERSION`]).
    pub version: u8,
    /// Opaque 16-octet identity chosen by the emitter.
    pub node_id: [u8; 16],
    /// Signed nanoseconds since the Unix epoch at emission time.
    pub timestamp: i64,
    /// Raw severity code as carried on the wire.
    pub severity: u8,
    /// CRC-32/IEEE of the first 26 octets.
    pub checksum: u32,
}

impl Frame {
    /// Create a frame with the current protocol version and wall-clock timestamp.
    #[must_use]
    pub fn new(node_id: [u8; 16], severity: Severity) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            node_id,
            timestamp: unix_nanos(),
            severity: severity.code(),
            checksum: 0,
        }
    }

    /// Severity decoded from the raw wire code (reserved codes map to `Unknown`).
    #[must_use]
    pub fn severity(&self) -> Severity {
        Severity::from_code(self.severity)
    }

    /// Encode into exactly [`FRAME_SIZE`] octets, computing the CRC.
    #[must_use]
    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let mut buf = [0u8; FRAME_SIZE];
        buf[0] = self.version;
        buf[1..17].copy_from_slice(&self.node_id);
        buf[17..25].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[25] = self.severity;

        let checksum = crc32fast::hash(&buf[..FRAME_DATA_SIZE]);
        buf[FRAME_DATA_SIZE..].copy_from_slice(&checksum.to_be_bytes());
        buf
    }

    /// Decode and verify a received buffer.
    ///
    /// # Errors
    ///
    /// - [`FrameError::BadLength`] if the buffer is not exactly 30 octets.
    /// - [`FrameError::BadChecksum`] if the trailing CRC does not match the
    ///   first 26 octets.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() != FRAME_SIZE {
            return Err(FrameError::BadLength(data.len()));
        }

        let stored = u32::from_be_bytes([data[26], data[27], data[28], data[29]]);
        let computed = crc32fast::hash(&data[..FRAME_DATA_SIZE]);
        if stored != computed {
            return Err(FrameError::BadChecksum { stored, computed });
        }

        let mut node_id = [0u8; 16];
        node_id.copy_from_slice(&data[1..17]);

        Ok(Self {
            version: data[0],
            node_id,
            timestamp: i64::from_be_bytes([
                data[17], data[18], data[19], data[20], data[21], data[22], data[23], data[24],
            ]),
            severity: data[25],
            checksum: stored,
        })
    }
}

/// Current wall-clock time as signed nanoseconds since the Unix epoch.
#[must_use]
pub fn unix_nanos() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> Frame {
        Frame {
            version: PROTOCOL_VERSION,
            node_id: *b"node-under-test!",
            timestamp: 1_700_000_000_123_456_789,
            severity: Severity::Warn.code(),
            checksum: 0,
        }
    }

    #[test]
    fn test_encode_canonical_frame() {
        let mut node_id = [0u8; 16];
        for (i, byte) in node_id.iter_mut().enumerate() {
            *byte = i as u8;
        }
        let frame = Frame {
            version: 1,
            node_id,
            timestamp: 0x0102_0304_0506_0708,
            severity: 1,
            checksum: 0,
        };

        let bytes = frame.encode();

        let mut expected_prefix = [0u8; FRAME_DATA_SIZE];
        expected_prefix[0] = 0x01;
        expected_prefix[1..17].copy_from_slice(&node_id);
        expected_prefix[17..25]
            .copy_from_slice(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        expected_prefix[25] = 0x01;
        assert_eq!(&bytes[..FRAME_DATA_SIZE], &expected_prefix);

        // Trailing 4 octets must equal the big-endian CRC-32/IEEE of the prefix.
        let crc = crc32fast::hash(&expected_prefix);
        assert_eq!(&bytes[FRAME_DATA_SIZE..], &crc.to_be_bytes());
    }

    #[test]
    fn test_round_trip_all_severities() {
        for code in 0u8..=2 {
            let frame = Frame {
                version: PROTOCOL_VERSION,
                node_id: [0xAB; 16],
                timestamp: -42,
                severity: code,
                checksum: 0,
            };
            let decoded = Frame::decode(&frame.encode()).expect("round trip should decode");
            assert_eq!(decoded.version, frame.version);
            assert_eq!(decoded.node_id, frame.node_id);
            assert_eq!(decoded.timestamp, frame.timestamp);
            assert_eq!(decoded.severity, code);
        }
    }

    #[test]
    fn test_round_trip_timestamp_extremes() {
        for ts in [i64::MIN, -1, 0, 1, i64::MAX] {
            let mut frame = sample_frame();
            frame.timestamp = ts;
            let decoded = Frame::decode(&frame.encode()).expect("round trip should decode");
            assert_eq!(decoded.timestamp, ts);
        }
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        for len in [0usize, 1, 29, 31, 64] {
            let buf = vec![0u8; len];
            assert_eq!(Frame::decode(&buf), Err(FrameError::BadLength(len)));
        }
    }

    #[test]
    fn test_decode_rejects_severity_bit_flip() {
        // Scenario from the field: a single flipped bit in the severity octet
        // must not surface as a different severity.
        let mut bytes = sample_frame().encode();
        bytes[25] ^= 0x01;
        assert!(matches!(
            Frame::decode(&bytes),
            Err(FrameError::BadChecksum { .. })
        ));
    }

    #[test]
    fn test_decode_detects_any_single_bit_flip() {
        let bytes = sample_frame().encode();

        for byte in 0..FRAME_SIZE {
            for bit in 0..8 {
                let mut corrupted = bytes;
                corrupted[byte] ^= 1 << bit;
                assert!(
                    matches!(
                        Frame::decode(&corrupted),
                        Err(FrameError::BadChecksum { .. })
                    ),
                    "flip at byte {} bit {} must be detected",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_decode_preserves_reserved_severity() {
        let mut frame = sample_frame();
        frame.severity = 7;
        let decoded = Frame::decode(&frame.encode()).expect("reserved code still decodes");
        assert_eq!(decoded.severity, 7);
        assert_eq!(decoded.severity(), Severity::Unknown(7));
    }

    #[test]
    fn test_checksum_field_populated_on_decode() {
        let bytes = sample_frame().encode();
        let decoded = Frame::decode(&bytes).expect("decode should succeed");
        assert_eq!(decoded.checksum, crc32fast::hash(&bytes[..FRAME_DATA_SIZE]));
    }
}
