//! Trigger Router
//!
//! Moves vehicle trigger records through a chain of named queues. Each queue
//! is serviced by a pool of workers running one stage:
//!
//! ```text
//! default_triggers --usage--> <usage>_car_triggers --thresholds--> write_db_triggers --> final record
//!                                                                \-> fusion_car_triggers
//! negative_triggers --(car type, usage)--> negative_trigger_<car>_<usage>
//! ```
//!
//! Every transition is paired with an audit entry update. Scheduled tasks
//! pull new triggers from the trigger API and alert on queue depth.
//!
//! CAN decoding is delegated to the `can-signal-decoder` library.

pub mod alert;
pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod record;
pub mod retry;
pub mod shutdown;
pub mod sink;
pub mod sources;
pub mod stages;
pub mod tasks;

pub use config::{load_config, AppConfig};
pub use pipeline::PipelineContext;
pub use pool::{Pipeline, RunningPipeline, Stage};
pub use record::TriggerRecord;
pub use shutdown::{Shutdown, ShutdownSignal};
pub use tasks::{Job, TaskRunner};
