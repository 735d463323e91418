//! Core types for the CAN signal decoder library
//!
//! This module defines the frame, decoded-signal and error types shared by the
//! signal dictionary, the frame decoder and the capture readers. Everything here
//! is plain data: the decoder keeps no state between frames.

use serde::Serialize;
use std::collections::BTreeMap;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DecoderError>;

/// Physical signal values of one frame, keyed by signal name
pub type DecodedSignals = BTreeMap<String, f64>;

/// Raw CAN frame read from a capture log or a binary record
///
/// This represents a single frame before any signal decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    /// Timestamp in the source log's unit (microseconds for binary records)
    pub timestamp: i64,
    /// Bus the frame was captured on (e.g. "can0"); empty for binary records
    pub bus: String,
    /// CAN message ID
    pub can_id: u32,
    /// Frame data bytes (0-8 bytes for classic CAN)
    pub data: Vec<u8>,
}

impl CanFrame {
    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.data.len()
    }
}

/// One decoded frame of a vehicle capture, as returned by `parse_capture`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureRecord {
    pub timestamp: i64,
    pub vehicle_id: String,
    pub vehicle_type: String,
    pub can_id: u32,
    pub signals: DecodedSignals,
    pub raw_data: Vec<u8>,
}

/// Errors that can occur during decoding
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error("Failed to parse DBC source: {0}")]
    DbcParseError(String),

    #[error("DBC source contains no valid message definitions")]
    NoMessages,

    #[error("Message not found: CAN ID 0x{0:X}")]
    UnknownMessage(u32),

    #[error("Payload too short for CAN ID 0x{id:X}: expected {expected} bytes, got {actual}")]
    PayloadTooShort {
        id: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Signal '{signal}' needs bits up to {required_bits} but payload has {available_bits}")]
    SignalOutOfRange {
        signal: String,
        required_bits: usize,
        available_bits: usize,
    },

    #[error("Capture log line {line}: {reason}")]
    ScanError { line: usize, reason: String },

    #[error("No signal data found in capture; check the DBC and log format")]
    NoSignalData,

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DecoderError {
    /// True for per-signal/per-frame errors that callers log and skip
    pub fn is_per_item(&self) -> bool {
        matches!(
            self,
            DecoderError::UnknownMessage(_)
                | DecoderError::PayloadTooShort { .. }
                | DecoderError::SignalOutOfRange { .. }
        )
    }
}
