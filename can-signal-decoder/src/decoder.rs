//! Main decoder API
//!
//! This module provides the primary interface for the decoder library.
//! The Decoder struct is the entry point for loading signal definitions,
//! decoding single frames and reading capture files.

use crate::config::DecoderConfig;
use crate::formats::{binary, BinaryRecordParser, CandumpParser, LogFileParser};
use crate::message_decoder::MessageDecoder;
use crate::scanner::{self, SignalTable};
use crate::signals::{DatabaseStats, SignalDatabase};
use crate::types::{CanFrame, CaptureRecord, DecodedSignals, Result};
use std::path::Path;

/// The main decoder struct - entry point for all decoding operations
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    /// Internal signal database (loaded from DBC sources)
    signal_db: SignalDatabase,
}

impl Decoder {
    /// Create a new decoder instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a decoder from a single DBC file
    pub fn from_dbc(path: &Path) -> Result<Self> {
        let mut decoder = Self::new();
        decoder.add_dbc(path)?;
        Ok(decoder)
    }

    /// Load a DBC file and add its definitions to the signal database
    ///
    /// # Example
    /// ```no_run
    /// use can_signal_decoder::Decoder;
    /// use std::path::Path;
    ///
    /// let mut decoder = Decoder::new();
    /// decoder.add_dbc(Path::new("powertrain.dbc")).unwrap();
    /// ```
    pub fn add_dbc(&mut self, path: &Path) -> Result<()> {
        let parsed = crate::signals::dbc::parse_dbc_file(path)?;
        self.merge(parsed);
        log::info!("DBC file loaded successfully: {:?}", path);
        Ok(())
    }

    /// Add definitions from DBC source text
    pub fn add_dbc_str(&mut self, source: &str) -> Result<()> {
        let parsed = crate::signals::dbc::parse_dbc_str(source)?;
        self.merge(parsed);
        Ok(())
    }

    fn merge(&mut self, parsed: SignalDatabase) {
        for message in parsed.all_messages().values() {
            self.signal_db.add_message(message.clone());
        }
    }

    /// Read-only access to the loaded dictionary
    pub fn database(&self) -> &SignalDatabase {
        &self.signal_db
    }

    /// Decode one frame payload into physical signal values
    pub fn decode_frame(&self, can_id: u32, data: &[u8]) -> Result<DecodedSignals> {
        MessageDecoder::decode(&self.signal_db, can_id, data)
    }

    /// Scan a text capture log into a per-timestamp table of target signals
    pub fn scan_log<S: AsRef<str>>(&self, path: &Path, targets: &[S]) -> Result<SignalTable> {
        scanner::scan_log(path, &self.signal_db, targets)
    }

    /// Decode every frame of a capture file into records
    ///
    /// `.bin` files are read as fixed-size binary records, anything else as a
    /// text capture log. Frames that fail to decode are logged and skipped;
    /// an unreadable or malformed file is an error.
    pub fn parse_capture(
        &self,
        path: &Path,
        vehicle_id: &str,
        vehicle_type: &str,
    ) -> Result<Vec<CaptureRecord>> {
        self.parse_capture_with(path, vehicle_id, vehicle_type, &DecoderConfig::default())
    }

    /// Same as `parse_capture`, applying the frame filters of `config`
    pub fn parse_capture_with(
        &self,
        path: &Path,
        vehicle_id: &str,
        vehicle_type: &str,
        config: &DecoderConfig,
    ) -> Result<Vec<CaptureRecord>> {
        log::info!("Parsing capture file: {:?}", path);

        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());

        let frames: Box<dyn Iterator<Item = Result<CanFrame>>> = match extension.as_deref() {
            Some("bin") => {
                log::debug!("Detected binary capture format");
                Box::new(BinaryRecordParser::parse(path)?)
            }
            _ => {
                log::debug!("Reading as text capture log");
                Box::new(CandumpParser::parse(path)?)
            }
        };

        let mut records = Vec::new();
        let mut skipped = 0usize;

        for frame in frames {
            let frame = frame?;
            if !config.should_process_frame(&frame) {
                continue;
            }
            match self.record_for(frame, vehicle_id, vehicle_type) {
                Some(record) => records.push(record),
                None => skipped += 1,
            }
        }

        log::info!(
            "Decoded {} records from {:?} ({} frames skipped)",
            records.len(),
            path,
            skipped
        );
        Ok(records)
    }

    /// Decode a single binary record received from a stream
    pub fn parse_capture_record(
        &self,
        bytes: &[u8],
        vehicle_id: &str,
        vehicle_type: &str,
    ) -> Result<CaptureRecord> {
        let frame = binary::decode_record(bytes)?;
        let signals = self.decode_frame(frame.can_id, &frame.data)?;
        Ok(CaptureRecord {
            timestamp: frame.timestamp,
            vehicle_id: vehicle_id.to_string(),
            vehicle_type: vehicle_type.to_string(),
            can_id: frame.can_id,
            signals,
            raw_data: frame.data,
        })
    }

    fn record_for(&self, frame: CanFrame, vehicle_id: &str, vehicle_type: &str) -> Option<CaptureRecord> {
        match self.decode_frame(frame.can_id, &frame.data) {
            Ok(signals) => Some(CaptureRecord {
                timestamp: frame.timestamp,
                vehicle_id: vehicle_id.to_string(),
                vehicle_type: vehicle_type.to_string(),
                can_id: frame.can_id,
                signals,
                raw_data: frame.data,
            }),
            Err(e) => {
                log::debug!("Skipping frame at {}: {}", frame.timestamp, e);
                None
            }
        }
    }

    /// Get statistics about the loaded signal database
    pub fn stats(&self) -> DatabaseStats {
        self.signal_db.stats()
    }
}
