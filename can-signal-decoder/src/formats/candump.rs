//! Text capture log parser
//!
//! One frame per line, in the candump log layout:
//!
//! ```text
//! (1700000000123) can0 1F4#0102030405060708
//! ```
//!
//! Unlike the DBC parser this reader is strict: the first malformed line ends
//! the iteration with a `ScanError` carrying its 1-based line number.

use super::LogFileParser;
use crate::types::{CanFrame, DecoderError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

/// Streaming parser over a text capture log
pub struct CandumpParser {
    lines: Lines<BufReader<File>>,
    line_number: usize,
    failed: bool,
}

impl LogFileParser for CandumpParser {
    fn parse(path: &Path) -> Result<Self> {
        log::debug!("Opening capture log: {:?}", path);
        let file = File::open(path)?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            line_number: 0,
            failed: false,
        })
    }
}

impl CandumpParser {
    /// Line number of the most recently read line
    pub fn line_number(&self) -> usize {
        self.line_number
    }
}

impl Iterator for CandumpParser {
    type Item = Result<CanFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            let line = self.lines.next()?;
            self.line_number += 1;
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(DecoderError::ScanError {
                        line: self.line_number,
                        reason: format!("unreadable line: {}", e),
                    }));
                }
            };

            match parse_line(&line, self.line_number) {
                Ok(Some(frame)) => return Some(Ok(frame)),
                Ok(None) => continue,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Parse one capture log line; blank lines yield `None`
pub fn parse_line(line: &str, line_number: usize) -> Result<Option<CanFrame>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let scan_error = |reason: String| DecoderError::ScanError {
        line: line_number,
        reason,
    };

    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 3 {
        return Err(scan_error(format!(
            "expected at least 3 fields, found {}",
            fields.len()
        )));
    }

    let ts_text = fields[0].trim_start_matches('(').trim_end_matches(')');
    let timestamp: i64 = ts_text
        .parse()
        .map_err(|e| scan_error(format!("invalid timestamp '{}': {}", ts_text, e)))?;

    let (id_text, payload_text) = fields[2]
        .split_once('#')
        .filter(|(_, payload)| !payload.contains('#'))
        .ok_or_else(|| scan_error(format!("invalid frame '{}'", fields[2])))?;

    let can_id = u32::from_str_radix(id_text, 16)
        .map_err(|e| scan_error(format!("invalid CAN ID '{}': {}", id_text, e)))?;

    if payload_text.len() % 2 != 0 {
        return Err(scan_error(format!(
            "payload must have an even number of hex digits, got {}",
            payload_text.len()
        )));
    }

    let data = hex::decode(payload_text)
        .map_err(|e| scan_error(format!("invalid payload '{}': {}", payload_text, e)))?;

    Ok(Some(CanFrame {
        timestamp,
        bus: fields[1].to_string(),
        can_id,
        data,
    }))
}
