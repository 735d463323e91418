//! Decoder configuration types
//!
//! Frame filters applied by `Decoder::parse_capture_with`. The decoder itself
//! stays stateless; anything beyond filtering lives in the application layer.

use crate::types::CanFrame;
use serde::{Deserialize, Serialize};

/// Configuration for capture parsing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Optional: only decode frames captured on these buses (text logs only)
    #[serde(default)]
    pub bus_filter: Option<Vec<String>>,

    /// Optional: only decode these specific CAN message IDs
    #[serde(default)]
    pub message_filter: Option<Vec<u32>>,
}

impl DecoderConfig {
    /// Create a new decoder configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set bus filter
    pub fn with_bus_filter<S: Into<String>>(mut self, buses: impl IntoIterator<Item = S>) -> Self {
        self.bus_filter = Some(buses.into_iter().map(Into::into).collect());
        self
    }

    /// Builder method: set message filter
    pub fn with_message_filter(mut self, messages: Vec<u32>) -> Self {
        self.message_filter = Some(messages);
        self
    }

    /// Check if a bus should be processed
    ///
    /// Binary records carry no bus name and always pass.
    pub fn should_process_bus(&self, bus: &str) -> bool {
        match &self.bus_filter {
            Some(buses) => bus.is_empty() || buses.iter().any(|b| b == bus),
            None => true,
        }
    }

    /// Check if a message ID should be processed
    pub fn should_process_message(&self, can_id: u32) -> bool {
        match &self.message_filter {
            Some(messages) => messages.contains(&can_id),
            None => true,
        }
    }

    /// Check if a frame should be processed based on filters
    pub fn should_process_frame(&self, frame: &CanFrame) -> bool {
        self.should_process_bus(&frame.bus) && self.should_process_message(frame.can_id)
    }
}
