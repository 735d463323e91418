//! Capture file readers (text capture logs, binary records)
//!
//! Each reader implements an iterator pattern over `CanFrame` objects.

use crate::types::{CanFrame, Result};
use std::path::Path;

pub mod binary;
pub mod candump;

pub use binary::{BinaryRecordParser, RECORD_SIZE};
pub use candump::CandumpParser;

/// Common trait for all capture file parsers
///
/// Each parser opens a file and returns an iterator over `CanFrame` objects.
pub trait LogFileParser: Iterator<Item = Result<CanFrame>> + Sized {
    /// Open a capture file and return an iterator over CAN frames
    fn parse(path: &Path) -> Result<Self>;
}
