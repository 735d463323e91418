//! Signal dictionary
//!
//! Holds the message definitions parsed from a DBC source, keyed by CAN ID.
//! The dictionary is built once and is read-only afterwards, so it can be
//! shared between threads without synchronization.

use std::collections::HashMap;

/// A complete CAN message definition
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDefinition {
    /// CAN message ID
    pub id: u32,
    /// Message name
    pub name: String,
    /// Declared data length code in bytes
    pub dlc: usize,
    /// Sender ECU name
    pub sender: String,
    /// All signals in this message, in declaration order
    pub signals: Vec<SignalDefinition>,
}

impl MessageDefinition {
    /// Look up a signal by name
    pub fn signal(&self, name: &str) -> Option<&SignalDefinition> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// Add a signal, replacing an earlier one with the same name
    pub(crate) fn upsert_signal(&mut self, signal: SignalDefinition) {
        match self.signals.iter_mut().find(|s| s.name == signal.name) {
            Some(existing) => *existing = signal,
            None => self.signals.push(signal),
        }
    }
}

/// A CAN signal definition
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDefinition {
    /// Signal name
    pub name: String,
    /// Start bit as written in the DBC source
    pub start_bit: u16,
    /// Length in bits
    pub length: u16,
    /// Byte order (`@1` little-endian, `@0` big-endian)
    pub byte_order: ByteOrder,
    /// Value type (signed/unsigned)
    pub value_type: ValueType,
    /// Scale factor to convert raw value to physical value
    pub factor: f64,
    /// Offset to add after scaling
    pub offset: f64,
    /// Minimum physical value
    pub min: f64,
    /// Maximum physical value
    pub max: f64,
    /// Engineering unit (e.g., "km/h", "deg", "V")
    pub unit: String,
}

impl SignalDefinition {
    /// Convert a raw integer to its physical value
    pub fn physical(&self, raw: i64) -> f64 {
        raw as f64 * self.factor + self.offset
    }
}

/// Byte order for signal extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian (Intel format)
    LittleEndian,
    /// Big-endian (Motorola format)
    BigEndian,
}

/// Value type for signal interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Signed integer
    Signed,
    /// Unsigned integer
    Unsigned,
}

/// The signal dictionary
#[derive(Debug, Clone, Default)]
pub struct SignalDatabase {
    /// Message definitions by CAN ID
    messages: HashMap<u32, MessageDefinition>,
}

impl SignalDatabase {
    /// Create a new empty signal database
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message definition, replacing any earlier one with the same ID
    pub fn add_message(&mut self, message: MessageDefinition) {
        if let Some(previous) = self.messages.insert(message.id, message) {
            log::debug!(
                "Message {} (ID 0x{:X}) redefined",
                previous.name,
                previous.id
            );
        }
    }

    /// Get the message definition for a CAN ID
    pub fn get_message(&self, can_id: u32) -> Option<&MessageDefinition> {
        self.messages.get(&can_id)
    }

    /// All message definitions keyed by CAN ID
    pub fn all_messages(&self) -> &HashMap<u32, MessageDefinition> {
        &self.messages
    }

    /// Number of message definitions
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Find all messages containing a specific signal name
    pub fn find_signal(&self, signal_name: &str) -> Vec<(u32, &SignalDefinition)> {
        let mut found: Vec<(u32, &SignalDefinition)> = self
            .messages
            .values()
            .filter_map(|msg| msg.signal(signal_name).map(|sig| (msg.id, sig)))
            .collect();
        found.sort_by_key(|(id, _)| *id);
        found
    }

    /// Get database statistics
    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            num_messages: self.messages.len(),
            num_signals: self.messages.values().map(|m| m.signals.len()).sum(),
        }
    }

    /// Get all CAN IDs in the database, sorted
    pub fn all_can_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.messages.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Database statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Total number of message definitions
    pub num_messages: usize,
    /// Total number of signal definitions
    pub num_signals: usize,
}
