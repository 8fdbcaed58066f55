//! Command implementations for the LabelForge CLI.

pub mod events;
pub mod export;
pub mod logs;
pub mod queue;
pub mod status;
pub mod train;
pub mod types;

pub use types::{ExportArgs, JobArgs, LogsArgs, QueueCommand, TrainArgs};
