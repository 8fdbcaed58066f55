//! LabelForge Training
//!
//! Everything about a training run that does not need a running process:
//! - Job configuration, defaults and validation (`TrainingConfig`)
//! - The argument contract of the external training program (`build_args`)
//! - Parsing of the program's stdout/stderr (`progress`)
//! - Job identifiers (`JobId`)

pub mod args;
pub mod config;
pub mod error;
pub mod job;
pub mod progress;

pub use args::{DRY_RUN_SUFFIX, build_args};
pub use config::{
    AugmentationConfig, DEFAULT_RUN_NAME, LossWeights, SUPPORTED_DEVICES, SUPPORTED_MODELS, SUPPORTED_OPTIMIZERS,
    TrainingConfig, ValidatedConfig,
};
pub use error::{TrainingError, TrainingResult};
pub use job::JobId;
pub use progress::{JSON_LOG_PREFIX, LogKind, MetricUpdate, StderrIssue, StdoutLine, parse_stdout_line};
