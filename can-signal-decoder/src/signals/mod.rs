//! Signal dictionary and DBC parser
//!
//! This module contains the DBC text parser and the dictionary it builds.

pub mod database;
pub mod dbc;

// Re-export key types for convenience
pub use database::{
    ByteOrder, DatabaseStats, MessageDefinition, SignalDatabase, SignalDefinition, ValueType,
};
