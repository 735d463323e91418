//! Binary capture record parser
//!
//! Fixed-size records as produced by the vehicle stream recorder:
//!
//! | bytes  | field                          |
//! |--------|--------------------------------|
//! | 0..8   | timestamp, µs, little-endian   |
//! | 8..12  | CAN ID, little-endian          |
//! | 12     | data length (clamped to 8)     |
//! | 13..21 | data bytes (zero padded)       |
//!
//! A trailing partial record is ignored.

use super::LogFileParser;
use crate::types::{CanFrame, DecoderError, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::Path;

/// Size of one binary capture record
pub const RECORD_SIZE: usize = 21;

/// Header bytes before the data field
const HEADER_SIZE: usize = 13;

/// Iterator over the frames of a binary capture file
pub struct BinaryRecordParser {
    reader: BufReader<File>,
    records_read: usize,
}

impl LogFileParser for BinaryRecordParser {
    fn parse(path: &Path) -> Result<Self> {
        log::debug!("Opening binary capture: {:?}", path);
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            records_read: 0,
        })
    }
}

impl Iterator for BinaryRecordParser {
    type Item = Result<CanFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = [0u8; RECORD_SIZE];
        let filled = match fill(&mut self.reader, &mut buf) {
            Ok(n) => n,
            Err(e) => return Some(Err(e.into())),
        };

        if filled < RECORD_SIZE {
            if filled > 0 {
                log::debug!(
                    "Ignoring {} trailing bytes after {} records",
                    filled,
                    self.records_read
                );
            }
            return None;
        }

        self.records_read += 1;
        Some(decode_record(&buf))
    }
}

/// Decode a single binary record (stream ingestion entry point)
pub fn decode_record(bytes: &[u8]) -> Result<CanFrame> {
    if bytes.len() < HEADER_SIZE {
        return Err(DecoderError::InvalidData(format!(
            "record needs at least {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }

    let mut cursor = Cursor::new(bytes);
    let timestamp = cursor.read_u64::<LittleEndian>()?;
    let can_id = cursor.read_u32::<LittleEndian>()?;
    let length = usize::from(cursor.read_u8()?).min(8);

    if bytes.len() < HEADER_SIZE + length {
        return Err(DecoderError::InvalidData(format!(
            "record declares {} data bytes but only {} are present",
            length,
            bytes.len() - HEADER_SIZE
        )));
    }

    let timestamp = i64::try_from(timestamp).map_err(|_| {
        DecoderError::InvalidData(format!("timestamp {} out of range", timestamp))
    })?;

    Ok(CanFrame {
        timestamp,
        bus: String::new(),
        can_id,
        data: bytes[HEADER_SIZE..HEADER_SIZE + length].to_vec(),
    })
}

/// Read until `buf` is full or EOF; returns the number of bytes read
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn record(ts: u64, id: u32, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(RECORD_SIZE);
        out.extend_from_slice(&ts.to_le_bytes());
        out.extend_from_slice(&id.to_le_bytes());
        out.push(data.len() as u8);
        let mut padded = [0u8; 8];
        padded[..data.len()].copy_from_slice(data);
        out.extend_from_slice(&padded);
        out
    }

    #[test]
    fn test_decode_record() {
        let frame = decode_record(&record(1_000_000, 0x1F4, &[0xAA, 0xBB])).unwrap();
        assert_eq!(frame.timestamp, 1_000_000);
        assert_eq!(frame.can_id, 0x1F4);
        assert_eq!(frame.data, vec![0xAA, 0xBB]);
    }

    #[test]
    fn test_length_is_clamped() {
        let mut bytes = record(1, 2, &[1; 8]);
        bytes[12] = 15;
        assert_eq!(decode_record(&bytes).unwrap().dlc(), 8);
    }

    #[test]
    fn test_short_record_is_rejected() {
        assert!(matches!(decode_record(&[0; 5]), Err(DecoderError::InvalidData(_))));
        let mut bytes = record(1, 2, &[1, 2, 3, 4]);
        bytes.truncate(HEADER_SIZE + 2);
        assert!(matches!(decode_record(&bytes), Err(DecoderError::InvalidData(_))));
    }

    #[test]
    fn test_parser_ignores_trailing_bytes() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&record(10, 0x100, &[1, 2, 3, 4, 5, 6, 7, 8])).unwrap();
        file.write_all(&record(20, 0x101, &[9])).unwrap();
        file.write_all(&[0xFF; 7]).unwrap();
        file.flush().unwrap();

        let frames: Vec<CanFrame> = BinaryRecordParser::parse(file.path())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].timestamp, 20);
        assert_eq!(frames[1].data, vec![9]);
    }
}
