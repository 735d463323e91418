//! Capture log scanner
//!
//! Streams a text capture log through the frame decoder and accumulates the
//! values of a chosen set of signals into a per-timestamp table.

use crate::formats::{CandumpParser, LogFileParser};
use crate::message_decoder::MessageDecoder;
use crate::signals::SignalDatabase;
use crate::types::{DecodedSignals, DecoderError, Result};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Signal values collected from a capture log, indexed by timestamp
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalTable {
    values: HashMap<i64, DecodedSignals>,
    timestamps: Vec<i64>,
}

impl SignalTable {
    /// Timestamps with at least one value, ascending and without duplicates
    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    /// All signal values recorded at `timestamp`
    pub fn signals_at(&self, timestamp: i64) -> Option<&DecodedSignals> {
        self.values.get(&timestamp)
    }

    /// Value of one signal at `timestamp`
    pub fn value(&self, timestamp: i64, signal: &str) -> Option<f64> {
        self.values.get(&timestamp)?.get(signal).copied()
    }

    /// Iterate rows in ascending timestamp order
    pub fn rows(&self) -> impl Iterator<Item = (i64, &DecodedSignals)> + '_ {
        self.timestamps
            .iter()
            .filter_map(move |ts| self.values.get(ts).map(|row| (*ts, row)))
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    fn insert(&mut self, timestamp: i64, signals: DecodedSignals) {
        self.values.entry(timestamp).or_default().extend(signals);
    }

    fn finish(mut self) -> Self {
        let mut timestamps: Vec<i64> = self.values.keys().copied().collect();
        timestamps.sort_unstable();
        self.timestamps = timestamps;
        self
    }
}

/// Scan a text capture log, keeping only the signals named in `targets`
///
/// A malformed line aborts the scan with `ScanError`; frames with unknown IDs
/// are skipped. Fails with `NoSignalData` if no target value was collected.
pub fn scan_log<S: AsRef<str>>(
    path: &Path,
    db: &SignalDatabase,
    targets: &[S],
) -> Result<SignalTable> {
    log::info!("Scanning capture log: {:?}", path);

    let wanted: HashSet<&str> = targets.iter().map(AsRef::as_ref).collect();
    let mut table = SignalTable::default();
    let mut frames = 0usize;
    let mut unknown = 0usize;

    for frame in CandumpParser::parse(path)? {
        let frame = frame?;
        frames += 1;

        let Some(message) = db.get_message(frame.can_id) else {
            unknown += 1;
            log::trace!("Unknown CAN ID 0x{:X}, skipping frame", frame.can_id);
            continue;
        };

        let signals =
            MessageDecoder::decode_signals(message, &frame.data, |name| wanted.contains(name));
        if !signals.is_empty() {
            table.insert(frame.timestamp, signals);
        }
    }

    let table = table.finish();
    log::debug!(
        "Scanned {} frames ({} unknown), {} timestamps with data",
        frames,
        unknown,
        table.len()
    );

    if table.is_empty() {
        return Err(DecoderError::NoSignalData);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::dbc::parse_dbc_str;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const DBC: &str = concat!(
        "BO_ 256 Chassis: 2 ECU\n",
        " SG_ Angle : 0|8@1+ (1,0) [0|255] \"deg\" ECU\n",
        " SG_ Speed : 8|8@1+ (1,0) [0|255] \"km/h\" ECU\n",
    );

    fn log_file(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_scan_keeps_only_targets_sorted() {
        let db = parse_dbc_str(DBC).unwrap();
        let file = log_file(&[
            "(20) can0 100#2301",
            "(10) can0 100#0A02",
            "(15) can0 200#FFFF",
            "(10) can1 100#0B03",
        ]);

        let table = scan_log(file.path(), &db, &["Angle"]).unwrap();
        assert_eq!(table.timestamps(), &[10, 20]);
        assert_eq!(table.value(20, "Angle"), Some(35.0));
        assert_eq!(table.value(10, "Angle"), Some(11.0));
        assert_eq!(table.value(10, "Speed"), None);
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let db = parse_dbc_str(DBC).unwrap();
        let file = log_file(&["(10) can0 100#0A02", "(20) can0 100#0A0"]);

        match scan_log(file.path(), &db, &["Angle"]) {
            Err(DecoderError::ScanError { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected scan error, got {other:?}"),
        }
    }

    #[test]
    fn test_no_target_values_is_error() {
        let db = parse_dbc_str(DBC).unwrap();
        let file = log_file(&["(10) can0 100#0A02", "(11) can0 300#00"]);

        assert!(matches!(
            scan_log(file.path(), &db, &["Missing"]),
            Err(DecoderError::NoSignalData)
        ));
    }

    #[test]
    fn test_short_payload_omits_signal() {
        let db = parse_dbc_str(DBC).unwrap();
        let file = log_file(&["(5) can0 100#07"]);

        let table = scan_log(file.path(), &db, &["Angle", "Speed"]).unwrap();
        let row = table.signals_at(5).unwrap();
        assert_eq!(row.get("Angle"), Some(&7.0));
        assert!(!row.contains_key("Speed"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let db = parse_dbc_str(DBC).unwrap();
        let result = scan_log(Path::new("/nonexistent/capture.log"), &db, &["Angle"]);
        assert!(matches!(result, Err(DecoderError::IoError(_))));
    }
}
