//! LabelForge Orchestrator
//!
//! Runs training jobs as supervised subprocesses:
//! - Durable priority queue with retries (`JobQueue`)
//! - Per-project status, logs and metrics with an event bus (`ProcessRegistry`)
//! - Launch, stop and out-of-memory relaunch of training runs (`TrainingOrchestrator`)
//! - Per-project log files and plain-text reports
//!
//! # Example
//!
//! ```rust,no_run
//! use labelforge_core::Settings;
//! use labelforge_orchestrator::TrainingOrchestrator;
//! use labelforge_training::TrainingConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = TrainingOrchestrator::from_settings(&Settings::discover_and_load());
//! let mut events = orchestrator.registry().subscribe_project("fish");
//!
//! let config = TrainingConfig {
//!     project_id: "fish".to_string(),
//!     data: "dataset/data.yaml".to_string(),
//!     ..TrainingConfig::default()
//! };
//! orchestrator.start(config).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod interpreter;
pub mod logfile;
pub mod orchestrator;
pub mod process;
pub mod queue;
pub mod report;

pub use error::{OrchestratorError, OrchestratorResult, QueueError};
pub use interpreter::{FixedInterpreter, InterpreterResolver};
pub use logfile::LogFile;
pub use orchestrator::{OrchestratorOptions, StartedRun, Submitted, TrainingOrchestrator};
pub use process::{
    LogEntry, LogStats, Metric, ProcessEvent, ProcessRegistry, ProcessState, ProcessStatus, ProcessSubscription,
};
pub use queue::{Job, JobQueue, JobStatus, Priority, QueueEvent, QueueStats};
