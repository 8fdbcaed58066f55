//! Settings file support.
//!
//! Settings are layered; later layers win:
//! 1. Built-in defaults
//! 2. Global file (`~/.labelforge/config.toml`)
//! 3. Local file (`./.labelforgerc`)
//! 4. Environment (`LABELFORGE_PROJECTS_DIR`, `LABELFORGE_DATA_DIR`, `LABELFORGE_PYTHON`)
//!
//! CLI flags are applied on top by the binary.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Resolved settings used by the export engine and the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding one sub-directory per project.
    pub projects_dir: PathBuf,
    /// Queue state and training logs live here.
    pub data_dir: PathBuf,
    /// Interpreter used to run the training script.
    pub python_path: Option<PathBuf>,
    /// Training script passed as the interpreter's first argument.
    pub training_script: PathBuf,
    /// Accept dataset manifests outside the project directory.
    pub allow_external_datasets: bool,
    /// In-memory log lines kept per project.
    pub max_memory_logs: usize,
    /// Log file size that triggers rotation.
    pub max_log_file_bytes: u64,
    /// Pause before relaunching a run that ran out of GPU memory.
    pub oom_retry_delay_ms: u64,
    /// How long a stopped run may take to exit after SIGTERM before it is
    /// killed.
    pub stop_grace_ms: u64,
    /// Base delay before a failed queued job runs again; grows with each
    /// retry.
    pub retry_backoff_ms: u64,
    pub training: TrainingDefaults,
    pub export: ExportDefaults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingDefaults {
    pub model: String,
    pub epochs: u32,
    pub batch: u32,
    pub imgsz: u32,
    /// Queue retries for jobs that do not set `max_retries`.
    pub max_retries: u32,
}

impl Default for TrainingDefaults {
    fn default() -> Self {
        Self { model: "yolov8n.pt".to_string(), epochs: 100, batch: 8, imgsz: 640, max_retries: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDefaults {
    pub num_keypoints: usize,
    pub train_ratio: f64,
    pub val_ratio: f64,
    pub test_ratio: f64,
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self { num_keypoints: 17, train_ratio: 0.8, val_ratio: 0.2, test_ratio: 0.0 }
    }
}

impl Default for Settings {
    fn default() -> Self {
        let home = Settings::default_home();
        Self {
            projects_dir: home.join("projects"),
            data_dir: home.join("data"),
            python_path: None,
            training_script: home.join("scripts").join("train.py"),
            allow_external_datasets: false,
            max_memory_logs: 500,
            max_log_file_bytes: 10 * 1024 * 1024,
            oom_retry_delay_ms: 3000,
            stop_grace_ms: 10_000,
            retry_backoff_ms: 5000,
            training: TrainingDefaults::default(),
            export: ExportDefaults::default(),
        }
    }
}

/// One settings layer as written on disk. Every field is optional so a
/// layer only overrides what it mentions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub projects_dir: Option<PathBuf>,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub python_path: Option<PathBuf>,
    #[serde(default)]
    pub training_script: Option<PathBuf>,
    #[serde(default)]
    pub allow_external_datasets: Option<bool>,
    #[serde(default)]
    pub max_memory_logs: Option<usize>,
    #[serde(default)]
    pub max_log_file_bytes: Option<u64>,
    #[serde(default)]
    pub oom_retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub stop_grace_ms: Option<u64>,
    #[serde(default)]
    pub retry_backoff_ms: Option<u64>,
    #[serde(default)]
    pub training: Option<TrainingDefaultsFile>,
    #[serde(default)]
    pub export: Option<ExportDefaultsFile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingDefaultsFile {
    pub model: Option<String>,
    pub epochs: Option<u32>,
    pub batch: Option<u32>,
    pub imgsz: Option<u32>,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportDefaultsFile {
    pub num_keypoints: Option<usize>,
    pub train_ratio: Option<f64>,
    pub val_ratio: Option<f64>,
    pub test_ratio: Option<f64>,
}

impl SettingsFile {
    /// Load a settings layer from a TOML file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Settings(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&content).map_err(|e| CoreError::Settings(format!("{}: {}", path.display(), e)))
    }
}

impl Settings {
    /// `~/.labelforge`, or `./.labelforge` when no home directory is known.
    #[must_use]
    pub fn default_home() -> PathBuf {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".labelforge")
    }

    #[must_use]
    pub fn default_global_path() -> PathBuf {
        Self::default_home().join("config.toml")
    }

    #[must_use]
    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".labelforgerc")
    }

    /// Discover and load all layers. Unreadable files are skipped with a
    /// warning so a broken local file never blocks the tool.
    pub fn discover_and_load() -> Self {
        let mut settings = Self::default();
        for path in [Self::default_global_path(), Self::default_local_path()] {
            if !path.exists() {
                continue;
            }
            match SettingsFile::load_from_file(&path) {
                Ok(layer) => settings.merge(&layer),
                Err(e) => tracing::warn!(error = %e, "Ignoring unreadable settings file"),
            }
        }
        settings.apply_env(|key| std::env::var(key).ok());
        settings
    }

    /// Merge a layer into these settings.
    pub fn merge(&mut self, layer: &SettingsFile) {
        if let Some(ref v) = layer.projects_dir {
            self.projects_dir = v.clone();
        }
        if let Some(ref v) = layer.data_dir {
            self.data_dir = v.clone();
        }
        if let Some(ref v) = layer.python_path {
            self.python_path = Some(v.clone());
        }
        if let Some(ref v) = layer.training_script {
            self.training_script = v.clone();
        }
        if let Some(v) = layer.allow_external_datasets {
            self.allow_external_datasets = v;
        }
        if let Some(v) = layer.max_memory_logs {
            self.max_memory_logs = v;
        }
        if let Some(v) = layer.max_log_file_bytes {
            self.max_log_file_bytes = v;
        }
        if let Some(v) = layer.oom_retry_delay_ms {
            self.oom_retry_delay_ms = v;
        }
        if let Some(v) = layer.stop_grace_ms {
            self.stop_grace_ms = v;
        }
        if let Some(v) = layer.retry_backoff_ms {
            self.retry_backoff_ms = v;
        }
        if let Some(ref t) = layer.training {
            if let Some(ref model) = t.model {
                self.training.model = model.clone();
            }
            self.training.epochs = t.epochs.unwrap_or(self.training.epochs);
            self.training.batch = t.batch.unwrap_or(self.training.batch);
            self.training.imgsz = t.imgsz.unwrap_or(self.training.imgsz);
            self.training.max_retries = t.max_retries.unwrap_or(self.training.max_retries);
        }
        if let Some(ref e) = layer.export {
            self.export.num_keypoints = e.num_keypoints.unwrap_or(self.export.num_keypoints);
            self.export.train_ratio = e.train_ratio.unwrap_or(self.export.train_ratio);
            self.export.val_ratio = e.val_ratio.unwrap_or(self.export.val_ratio);
            self.export.test_ratio = e.test_ratio.unwrap_or(self.export.test_ratio);
        }
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LABELFORGE_PROJECTS_DIR").filter(|v| !v.is_empty()) {
            self.projects_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LABELFORGE_DATA_DIR").filter(|v| !v.is_empty()) {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LABELFORGE_PYTHON").filter(|v| !v.is_empty()) {
            self.python_path = Some(PathBuf::from(v));
        }
    }

    /// Persisted job queue.
    #[must_use]
    pub fn queue_file(&self) -> PathBuf {
        self.data_dir.join("job_queue.json")
    }

    /// Per-project training log files.
    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("training_logs")
    }

    /// Save these settings as a complete TOML layer.
    pub fn save_to_file(&self, path: &Path) -> CoreResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CoreError::Settings(format!("Failed to serialize: {e}")))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.max_memory_logs, 500);
        assert_eq!(settings.export.num_keypoints, 17);
        assert_eq!(settings.training.model, "yolov8n.pt");
        assert!(settings.queue_file().ends_with("data/job_queue.json"));
    }

    #[test]
    fn test_partial_layer_only_overrides_mentioned_fields() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
projects_dir = "/srv/projects"

[training]
epochs = 20
"#,
        )
        .unwrap();

        let layer = SettingsFile::load_from_file(&path).unwrap();
        let mut settings = Settings::default();
        settings.merge(&layer);

        assert_eq!(settings.projects_dir, PathBuf::from("/srv/projects"));
        assert_eq!(settings.training.epochs, 20);
        assert_eq!(settings.training.batch, 8);
        assert_eq!(settings.training.max_retries, 3);
        assert_eq!(settings.max_memory_logs, 500);
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings.apply_env(|key| match key {
            "LABELFORGE_PYTHON" => Some("/usr/bin/python3".to_string()),
            "LABELFORGE_DATA_DIR" => Some(String::new()),
            _ => None,
        });
        assert_eq!(settings.python_path, Some(PathBuf::from("/usr/bin/python3")));
        assert_eq!(settings.data_dir, Settings::default().data_dir);
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");
        let mut settings = Settings::default();
        settings.oom_retry_delay_ms = 10;
        settings.retry_backoff_ms = 250;
        settings.save_to_file(&path).unwrap();

        let mut reloaded = Settings::default();
        reloaded.merge(&SettingsFile::load_from_file(&path).unwrap());
        assert_eq!(reloaded.oom_retry_delay_ms, 10);
        assert_eq!(reloaded.retry_backoff_ms, 250);
        assert_eq!(reloaded.stop_grace_ms, 10_000);
    }

    #[test]
    fn test_invalid_file_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.toml");
        std::fs::write(&path, "projects_dir = [").unwrap();
        assert!(matches!(SettingsFile::load_from_file(&path), Err(CoreError::Settings(_))));
    }
}
