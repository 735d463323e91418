//! Classification router stages
//!
//! One stage per queue kind:
//! - `usage`: default queue -> usage queue, by usage type
//! - `threshold`: usage queue -> write-db or fusion queue, by CAN signal thresholds
//! - `write_db`: write-db queue -> final record + completed audit entry
//! - `negative`: negative-trigger inbound queue -> (car type, usage type) queue

pub mod negative;
pub mod threshold;
pub mod usage;
pub mod write_db;

pub use negative::NegativeRouter;
pub use threshold::{evaluate, ThresholdStage, ThresholdVerdict};
pub use usage::UsageRouter;
pub use write_db::WriteDbStage;
