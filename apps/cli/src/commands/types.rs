//! Command type definitions shared between main.rs and the commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use labelforge_core::{ExportOptions, Settings};
use labelforge_training::TrainingConfig;
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Project id
    pub project: String,

    /// Export to <PATH>/dataset instead of the project directory
    #[arg(long)]
    pub custom_path: Option<String>,

    /// Keypoint slots per object
    #[arg(long)]
    pub keypoints: Option<usize>,

    /// Share of images for the train split
    #[arg(long)]
    pub train: Option<f64>,

    /// Share of images for the val split
    #[arg(long)]
    pub val: Option<f64>,

    /// Share of images for the test split
    #[arg(long)]
    pub test: Option<f64>,

    /// Keep upload order instead of shuffling
    #[arg(long)]
    pub no_shuffle: bool,

    /// Seed for a reproducible shuffle
    #[arg(long)]
    pub seed: Option<u64>,

    /// Skip images without annotations
    #[arg(long)]
    pub annotated_only: bool,

    /// Omit the visibility flag after each keypoint
    #[arg(long)]
    pub no_visibility: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl ExportArgs {
    /// Export defaults from settings with these flags applied.
    pub fn to_options(&self, settings: &Settings) -> ExportOptions {
        let defaults = ExportOptions::from(&settings.export);
        ExportOptions {
            include_visibility: !self.no_visibility,
            custom_path: self.custom_path.clone(),
            num_keypoints: self.keypoints.unwrap_or(defaults.num_keypoints),
            train_ratio: self.train.unwrap_or(defaults.train_ratio),
            val_ratio: self.val.unwrap_or(defaults.val_ratio),
            test_ratio: self.test.unwrap_or(defaults.test_ratio),
            shuffle: !self.no_shuffle,
            include_unannotated: !self.annotated_only,
            seed: self.seed,
        }
    }
}

/// Job definition flags shared by `train` and `queue add`.
#[derive(Args, Debug, Clone)]
pub struct JobArgs {
    /// Project id
    pub project: String,

    /// Dataset manifest, relative to the project directory
    #[arg(long)]
    pub data: Option<String>,

    /// Load the job from a TOML or JSON file; other flags override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Model weights (e.g. yolov8n-pose.pt)
    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub epochs: Option<u32>,

    #[arg(long)]
    pub batch: Option<u32>,

    #[arg(long)]
    pub imgsz: Option<u32>,

    /// GPU index (0-7), cpu or auto
    #[arg(long)]
    pub device: Option<String>,

    /// Run name
    #[arg(long)]
    pub name: Option<String>,

    /// Disable augmentation (neutral values are passed)
    #[arg(long)]
    pub no_augment: bool,

    /// Queue retries for this job
    #[arg(long)]
    pub max_retries: Option<u32>,
}

impl JobArgs {
    /// Build the job config: settings defaults, then the config file, then
    /// flags.
    pub fn to_config(&self, settings: &Settings) -> Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::load_from_file(path)
                .with_context(|| format!("Failed to load training config {}", path.display()))?,
            None => TrainingConfig {
                model: settings.training.model.clone(),
                epochs: settings.training.epochs,
                batch: settings.training.batch,
                imgsz: settings.training.imgsz,
                ..TrainingConfig::default()
            },
        };

        config.project_id.clone_from(&self.project);
        if let Some(data) = &self.data {
            config.data.clone_from(data);
        } else if config.data.trim().is_empty() {
            config.data = "dataset/data.yaml".to_string();
        }
        if let Some(model) = &self.model {
            config.model.clone_from(model);
        }
        config.epochs = self.epochs.unwrap_or(config.epochs);
        config.batch = self.batch.unwrap_or(config.batch);
        config.imgsz = self.imgsz.unwrap_or(config.imgsz);
        if let Some(device) = &self.device {
            config.device.clone_from(device);
        }
        if self.name.is_some() {
            config.name.clone_from(&self.name);
        }
        if self.no_augment {
            config.augmentation.enabled = false;
        }
        if self.max_retries.is_some() {
            config.max_retries = self.max_retries;
        }
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    #[command(flatten)]
    pub job: JobArgs,

    /// One epoch with a small batch to check the setup
    #[arg(long)]
    pub dry_run: bool,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum QueueCommand {
    /// Add a job to the queue
    Add {
        #[command(flatten)]
        job: JobArgs,

        /// Higher runs earlier
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        priority: i64,
    },

    /// List queued jobs
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Cancel a pending job
    Cancel {
        /// Job id
        id: String,
    },

    /// Remove a job that is not running
    Remove {
        /// Job id
        id: String,
    },

    /// Move a pending job to another position
    Reorder {
        /// Current position in the pending list (0-based)
        from: usize,

        /// New position (0-based)
        to: usize,
    },

    /// Drop completed and cancelled jobs
    Clear,

    /// Run queued jobs in the foreground until Ctrl-C
    Run {
        /// Exit once nothing is pending or running
        #[arg(long)]
        until_empty: bool,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct LogsArgs {
    /// Project id
    pub project: String,

    /// Number of lines from the end of the log file
    #[arg(long, default_value_t = 50)]
    pub tail: usize,

    /// Only lines containing this keyword (case-insensitive)
    #[arg(long)]
    pub search: Option<String>,

    /// Write a plain-text training report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Show log file statistics
    #[arg(long)]
    pub stats: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
