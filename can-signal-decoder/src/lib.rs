//! CAN Signal Decoder Library
//!
//! A stateless, reusable library for turning raw CAN traffic into physical
//! signal values using DBC signal definitions.
//!
//! # Architecture
//!
//! This library is intentionally minimal and focused on decoding:
//! - Parses DBC sources into a read-only signal dictionary
//! - Decodes single frame payloads (little- and big-endian, signed/unsigned)
//! - Scans text capture logs into a per-timestamp signal table
//! - Reads binary capture records
//!
//! The library does NOT:
//! - Evaluate thresholds or classify records
//! - Talk to queues, databases or HTTP services
//!
//! All higher-level functionality is in the application layer (trigger-router).
//!
//! # Example Usage
//!
//! ```no_run
//! use can_signal_decoder::Decoder;
//! use std::path::Path;
//!
//! let decoder = Decoder::from_dbc(Path::new("chassis.dbc")).unwrap();
//!
//! let table = decoder
//!     .scan_log(Path::new("segment.log"), &["SteeringAngle"])
//!     .unwrap();
//!
//! for (timestamp, signals) in table.rows() {
//!     println!("{}: {:?}", timestamp, signals);
//! }
//! ```

// Public modules
pub mod config;
pub mod decoder;
pub mod formats;
pub mod message_decoder;
pub mod scanner;
pub mod signals;
pub mod types;

// Re-export main types for convenience
pub use config::DecoderConfig;
pub use decoder::Decoder;
pub use message_decoder::MessageDecoder;
pub use scanner::{scan_log, SignalTable};
pub use signals::{
    dbc::{parse_dbc_file, parse_dbc_str},
    ByteOrder, DatabaseStats, MessageDefinition, SignalDatabase, SignalDefinition, ValueType,
};
pub use types::{CanFrame, CaptureRecord, DecodedSignals, DecoderError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Smoke test: ensure we can create a decoder
        let decoder = Decoder::new();
        let stats = decoder.stats();
        assert_eq!(stats.num_messages, 0);
        assert!(!VERSION.is_empty());
    }
}
