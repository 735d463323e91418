//! DBC text parser
//!
//! Line-oriented parser for the subset of the Vector DBC format that carries
//! message and signal layouts:
//!
//! ```text
//! BO_ <id> <name>: <dlc> <sender>
//!  SG_ <name> : <start>|<length>@<1|0><+|-> (<factor>,<offset>) [<min>|<max>] "<unit>" <receiver>
//! ```
//!
//! Parsing is permissive: malformed lines and signal lines that appear before
//! any message header are skipped. The only fatal outcome is a source with no
//! valid message definition at all.

use crate::signals::database::{
    ByteOrder, MessageDefinition, SignalDatabase, SignalDefinition, ValueType,
};
use crate::types::{DecoderError, Result};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

fn message_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^BO_\s+(\d+)\s+([A-Za-z0-9_]+)\s*:\s*(\d+)\s+([A-Za-z0-9_]+)")
            .expect("static message regex")
    })
}

fn signal_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"^SG_\s+([A-Za-z0-9_]+)\s*:\s*(\d+)\|(\d+)@([01])([+-])\s*",
            r"\(\s*([^,\s]+)\s*,\s*([^)\s]+)\s*\)\s*",
            r#"\[\s*([^|\s]+)\s*\|\s*([^\]\s]+)\s*\]\s*"([^"]*)"\s*([A-Za-z0-9_,]+)?"#,
        ))
        .expect("static signal regex")
    })
}

/// Parse a DBC file from disk
pub fn parse_dbc_file(path: &Path) -> Result<SignalDatabase> {
    log::info!("Parsing DBC file: {:?}", path);

    let bytes = std::fs::read(path).map_err(|e| {
        DecoderError::DbcParseError(format!("Failed to read file {:?}: {}", path, e))
    })?;

    // DBC files are frequently Windows-1252; fall back to Latin-1 byte mapping
    let content = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            log::warn!("DBC file is not UTF-8, trying Latin-1 encoding");
            e.into_bytes().iter().map(|&b| b as char).collect()
        }
    };

    let db = parse_dbc_str(&content)?;
    log::info!("Parsed {} messages from {:?}", db.len(), path);
    Ok(db)
}

/// Parse DBC source text into a signal database
pub fn parse_dbc_str(source: &str) -> Result<SignalDatabase> {
    let mut db = SignalDatabase::new();
    let mut current: Option<MessageDefinition> = None;

    for (idx, raw_line) in source.lines().enumerate() {
        let line = raw_line.trim();

        if line.starts_with("BO_ ") || line.starts_with("BO_\t") {
            if let Some(done) = current.take() {
                db.add_message(done);
            }
            current = parse_message_line(line);
            if current.is_none() {
                log::warn!("DBC line {}: malformed message header skipped", idx + 1);
            }
            continue;
        }

        if line.starts_with("SG_ ") || line.starts_with("SG_\t") {
            let Some(message) = current.as_mut() else {
                log::debug!("DBC line {}: signal outside of a message ignored", idx + 1);
                continue;
            };
            match parse_signal_line(line) {
                Some(signal) => {
                    if usize::from(signal.start_bit) + usize::from(signal.length)
                        > message.dlc * 8
                    {
                        log::debug!(
                            "Signal {} in {} exceeds DLC {}; it will fail per frame",
                            signal.name,
                            message.name,
                            message.dlc
                        );
                    }
                    message.upsert_signal(signal);
                }
                None => log::warn!("DBC line {}: malformed signal skipped", idx + 1),
            }
            continue;
        }

        // Any other statement closes the current message block
        if !line.is_empty() {
            if let Some(done) = current.take() {
                db.add_message(done);
            }
        }
    }

    if let Some(done) = current.take() {
        db.add_message(done);
    }

    if db.is_empty() {
        return Err(DecoderError::NoMessages);
    }

    Ok(db)
}

fn parse_message_line(line: &str) -> Option<MessageDefinition> {
    let caps = message_regex().captures(line)?;
    Some(MessageDefinition {
        id: caps[1].parse().ok()?,
        name: caps[2].to_string(),
        dlc: caps[3].parse().ok()?,
        sender: caps[4].to_string(),
        signals: Vec::new(),
    })
}

fn parse_signal_line(line: &str) -> Option<SignalDefinition> {
    let caps = signal_regex().captures(line)?;

    let length: u16 = caps[3].parse().ok()?;
    if length == 0 || length > 64 {
        return None;
    }

    Some(SignalDefinition {
        name: caps[1].to_string(),
        start_bit: caps[2].parse().ok()?,
        length,
        byte_order: if &caps[4] == "1" {
            ByteOrder::LittleEndian
        } else {
            ByteOrder::BigEndian
        },
        value_type: if &caps[5] == "-" {
            ValueType::Signed
        } else {
            ValueType::Unsigned
        },
        factor: caps[6].parse().ok()?,
        offset: caps[7].parse().ok()?,
        min: caps[8].parse().ok()?,
        max: caps[9].parse().ok()?,
        unit: caps[10].to_string(),
    })
}
