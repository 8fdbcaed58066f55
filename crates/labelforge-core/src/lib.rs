//! LabelForge Core
//!
//! Filesystem-facing building blocks shared by the CLI and the training
//! orchestrator:
//! - Path resolution and traversal checks (`PathResolver`)
//! - Project layout on disk (`ProjectLayout`)
//! - YOLO pose dataset export (`ExportEngine`)
//! - Lock-tolerant directory replacement (`fs_ops`)
//! - Layered settings (`Settings`)
//!
//! # Example
//!
//! ```rust,no_run
//! use labelforge_core::{ExportEngine, ExportOptions};
//!
//! let engine = ExportEngine::new("/srv/labelforge/projects");
//! let outcome = engine.export("fish", &ExportOptions::default())?;
//! println!("{} images -> {}", outcome.stats.images, outcome.manifest.display());
//! # Ok::<(), labelforge_core::CoreError>(())
//! ```

pub mod error;
pub mod export;
pub mod fs_ops;
pub mod layout;
pub mod paths;
pub mod settings;

pub use error::{ConfigIssue, CoreError, CoreResult, FieldError};
pub use export::{ExportEngine, ExportOptions, ExportOutcome, ExportStats, SplitStats};
pub use export::split::Split;
pub use fs_ops::{RemovalOutcome, RetryPolicy, cleanup_pending_deletions, remove_dir_safely, replace_dir};
pub use layout::ProjectLayout;
pub use paths::{PathInfo, PathResolver, describe, to_yolo_format};
pub use settings::{ExportDefaults, Settings, SettingsFile, TrainingDefaults};
