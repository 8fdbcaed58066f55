//! Training job configuration and its validation rules.
//!
//! A [`TrainingConfig`] is what a user submits (CLI flags, a TOML/JSON file,
//! or a queued job). It is checked in two stages: field bounds first, then
//! the dataset path is resolved against the project root. Only a
//! [`ValidatedConfig`] can be turned into a command line.

use crate::error::{TrainingError, TrainingResult};
use labelforge_core::{ConfigIssue, FieldError, PathResolver};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Base checkpoints the training program knows how to fetch.
pub const SUPPORTED_MODELS: &[&str] = &[
    "yolov8n.pt",
    "yolov8s.pt",
    "yolov8m.pt",
    "yolov8l.pt",
    "yolov8x.pt",
    "yolov8n-pose.pt",
    "yolov8s-pose.pt",
    "yolov8m-pose.pt",
    "yolov8l-pose.pt",
    "yolov8x-pose.pt",
];

pub const SUPPORTED_DEVICES: &[&str] = &["0", "1", "2", "3", "4", "5", "6", "7", "cpu", "auto"];

pub const SUPPORTED_OPTIMIZERS: &[&str] = &["auto", "SGD", "Adam", "AdamW", "NAdam", "RAdam", "RMSProp"];

/// Run name used when the config does not set one.
pub const DEFAULT_RUN_NAME: &str = "exp_auto";

/// A training job as submitted.
///
/// Keys are camelCase; the snake_case spellings are accepted too. Nested
/// augmentation and loss keys keep the training program's own names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrainingConfig {
    /// Project the run belongs to.
    #[serde(alias = "project_id")]
    pub project_id: String,
    /// Dataset manifest (`data.yaml`), relative to the project directory or absolute.
    pub data: String,
    pub model: String,
    pub epochs: u32,
    pub batch: u32,
    pub imgsz: u32,
    pub device: String,
    /// Run name; defaults to [`DEFAULT_RUN_NAME`].
    pub name: Option<String>,
    /// Directory runs are written to (the training program's `--project`).
    #[serde(alias = "output_dir")]
    pub output_dir: Option<PathBuf>,
    pub workers: u32,
    pub patience: u32,
    pub optimizer: String,
    pub lr0: Option<f64>,
    pub lrf: Option<f64>,
    pub momentum: Option<f64>,
    #[serde(alias = "weight_decay")]
    pub weight_decay: Option<f64>,
    #[serde(alias = "cos_lr")]
    pub cos_lr: bool,
    pub rect: bool,
    #[serde(alias = "cache_images")]
    pub cache_images: bool,
    pub resume: bool,
    pub augmentation: AugmentationConfig,
    pub loss: LossWeights,
    /// Comma separated export formats, e.g. `onnx,tflite`.
    #[serde(alias = "export_formats")]
    pub export_formats: Option<String>,
    /// Retry budget when queued; the queue default applies when unset.
    #[serde(alias = "max_retries")]
    pub max_retries: Option<u32>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            data: String::new(),
            model: "yolov8n.pt".to_string(),
            epochs: 100,
            batch: 8,
            imgsz: 640,
            device: "0".to_string(),
            name: None,
            output_dir: None,
            workers: 0,
            patience: 60,
            optimizer: "auto".to_string(),
            lr0: None,
            lrf: None,
            momentum: None,
            weight_decay: None,
            cos_lr: false,
            rect: false,
            cache_images: false,
            resume: false,
            augmentation: AugmentationConfig::default(),
            loss: LossWeights::default(),
            export_formats: None,
            max_retries: None,
        }
    }
}

/// Image augmentation knobs passed straight through to the training program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    pub enabled: bool,
    pub degrees: f64,
    pub translate: f64,
    pub scale: f64,
    pub shear: f64,
    pub perspective: f64,
    pub fliplr: f64,
    pub flipud: f64,
    pub hsv_h: f64,
    pub hsv_s: f64,
    pub hsv_v: f64,
    pub mosaic: f64,
    /// Disable mosaic for the last N epochs.
    pub close_mosaic: u32,
    pub mixup: f64,
    pub copy_paste: f64,
    pub erasing: f64,
    pub crop_fraction: f64,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            degrees: 0.0,
            translate: 0.1,
            scale: 0.5,
            shear: 0.0,
            perspective: 0.0,
            fliplr: 0.5,
            flipud: 0.0,
            hsv_h: 0.015,
            hsv_s: 0.7,
            hsv_v: 0.4,
            mosaic: 1.0,
            close_mosaic: 0,
            mixup: 0.0,
            copy_paste: 0.0,
            erasing: 0.4,
            crop_fraction: 1.0,
        }
    }
}

impl AugmentationConfig {
    /// Values that leave images untouched.
    #[must_use]
    pub fn neutral() -> Self {
        Self {
            enabled: false,
            degrees: 0.0,
            translate: 0.0,
            scale: 0.0,
            shear: 0.0,
            perspective: 0.0,
            fliplr: 0.0,
            flipud: 0.0,
            hsv_h: 0.0,
            hsv_s: 0.0,
            hsv_v: 0.0,
            mosaic: 0.0,
            close_mosaic: 0,
            mixup: 0.0,
            copy_paste: 0.0,
            erasing: 0.0,
            crop_fraction: 1.0,
        }
    }

    /// The values actually passed to the training program.
    #[must_use]
    pub fn effective(&self) -> Self {
        if self.enabled { self.clone() } else { Self::neutral() }
    }
}

/// Loss gains for the pose head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossWeights {
    pub pose: f64,
    #[serde(rename = "box")]
    pub bbox: f64,
    pub cls: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self { pose: 25.0, bbox: 7.5, cls: 0.5 }
    }
}

/// A config whose fields passed validation and whose dataset path resolved
/// to an existing manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    pub config: TrainingConfig,
    pub dataset: PathBuf,
}

impl ValidatedConfig {
    #[must_use]
    pub fn run_name(&self) -> &str {
        self.config.run_name()
    }
}

#[derive(Default)]
struct Checker {
    errors: Vec<FieldError>,
}

impl Checker {
    fn range<T: PartialOrd + Display + Copy>(&mut self, field: &str, value: T, min: T, max: T) {
        if !(min..=max).contains(&value) {
            self.errors.push(FieldError::new(field, format!("must be between {min} and {max}, got {value}")));
        }
    }

    fn optional_range(&mut self, field: &str, value: Option<f64>, min: f64, max: f64) {
        if let Some(v) = value {
            self.range(field, v, min, max);
        }
    }

    fn one_of(&mut self, field: &str, value: &str, allowed: &[&str]) {
        if !allowed.contains(&value) {
            self.errors.push(FieldError::new(field, format!("'{value}' is not one of: {}", allowed.join(", "))));
        }
    }

    fn require(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.errors.push(FieldError::new(field, "is required"));
        }
    }
}

/// `[a-z0-9,]*`, case-insensitive.
fn is_format_list(formats: &str) -> bool {
    formats.chars().all(|c| c.is_ascii_alphanumeric() || c == ',')
}

impl TrainingConfig {
    /// Load a config from a `.toml` or `.json` file.
    pub fn load_from_file(path: &Path) -> TrainingResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).map(str::to_lowercase);
        let parse_err = |message: String| TrainingError::Parse { path: path.to_path_buf(), message };

        let config = match ext.as_deref() {
            Some("toml") => toml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
            Some("json") => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
            _ => return Err(TrainingError::UnsupportedFormat(path.to_path_buf())),
        };
        debug!(path = %path.display(), "Loaded training config");
        Ok(config)
    }

    #[must_use]
    pub fn run_name(&self) -> &str {
        self.name.as_deref().map(str::trim).filter(|n| !n.is_empty()).unwrap_or(DEFAULT_RUN_NAME)
    }

    /// Every field-level problem, empty when the fields are acceptable.
    #[must_use]
    pub fn schema_errors(&self) -> Vec<FieldError> {
        let mut c = Checker::default();

        c.require("project_id", &self.project_id);
        c.require("data", &self.data);
        c.one_of("model", &self.model, SUPPORTED_MODELS);
        c.range("epochs", self.epochs, 1, 10_000);
        c.range("batch", self.batch, 1, 512);
        c.range("imgsz", self.imgsz, 32, 4096);
        c.one_of("device", &self.device, SUPPORTED_DEVICES);
        c.range("workers", self.workers, 0, 32);
        c.range("patience", self.patience, 0, 1000);
        c.one_of("optimizer", &self.optimizer, SUPPORTED_OPTIMIZERS);
        c.optional_range("lr0", self.lr0, 0.0, 1.0);
        c.optional_range("lrf", self.lrf, 0.0, 1.0);
        c.optional_range("momentum", self.momentum, 0.0, 1.0);
        c.optional_range("weight_decay", self.weight_decay, 0.0, 1.0);

        if let Some(name) = &self.name {
            if labelforge_core::paths::validate_segment(name, "name").is_err() {
                c.errors.push(FieldError::new("name", "must be a single path segment"));
            }
        }
        if let Some(formats) = &self.export_formats {
            if !is_format_list(formats) {
                c.errors.push(FieldError::new(
                    "export_formats",
                    "must be comma separated format names, e.g. onnx,tflite",
                ));
            }
        }

        let a = &self.augmentation;
        c.range("augmentation.degrees", a.degrees, 0.0, 180.0);
        c.range("augmentation.translate", a.translate, 0.0, 1.0);
        c.range("augmentation.scale", a.scale, 0.0, 1.0);
        c.range("augmentation.shear", a.shear, 0.0, 180.0);
        c.range("augmentation.perspective", a.perspective, 0.0, 0.001);
        c.range("augmentation.fliplr", a.fliplr, 0.0, 1.0);
        c.range("augmentation.flipud", a.flipud, 0.0, 1.0);
        c.range("augmentation.hsv_h", a.hsv_h, 0.0, 1.0);
        c.range("augmentation.hsv_s", a.hsv_s, 0.0, 1.0);
        c.range("augmentation.hsv_v", a.hsv_v, 0.0, 1.0);
        c.range("augmentation.mosaic", a.mosaic, 0.0, 1.0);
        c.range("augmentation.close_mosaic", a.close_mosaic, 0, self.epochs.max(1));
        c.range("augmentation.mixup", a.mixup, 0.0, 1.0);
        c.range("augmentation.copy_paste", a.copy_paste, 0.0, 1.0);
        c.range("augmentation.erasing", a.erasing, 0.0, 0.9);
        c.range("augmentation.crop_fraction", a.crop_fraction, 0.1, 1.0);

        c.range("loss.pose", self.loss.pose, 0.0, 100.0);
        c.range("loss.box", self.loss.bbox, 0.0, 100.0);
        c.range("loss.cls", self.loss.cls, 0.0, 100.0);

        c.errors
    }

    /// Check every field, then resolve `data` through `resolver`.
    ///
    /// Schema problems are reported together; path problems only once the
    /// fields are clean.
    pub fn validate(&self, resolver: &PathResolver) -> Result<ValidatedConfig, ConfigIssue> {
        let errors = self.schema_errors();
        if !errors.is_empty() {
            return Err(ConfigIssue::Schema(errors));
        }
        let dataset = resolver.resolve_existing(&self.data)?;
        Ok(ValidatedConfig { config: self.clone(), dataset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn valid() -> TrainingConfig {
        TrainingConfig {
            project_id: "fish".to_string(),
            data: "dataset/data.yaml".to_string(),
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn test_defaults_pass_schema() {
        assert!(valid().schema_errors().is_empty());
    }

    #[test]
    fn test_schema_collects_every_error() {
        let config = TrainingConfig {
            project_id: String::new(),
            epochs: 0,
            batch: 1024,
            device: "9".to_string(),
            model: "yolov5.pt".to_string(),
            export_formats: Some("onnx;rm -rf".to_string()),
            ..valid()
        };
        let fields: Vec<String> = config.schema_errors().into_iter().map(|e| e.field).collect();
        for expected in ["project_id", "epochs", "batch", "device", "model", "export_formats"] {
            assert!(fields.iter().any(|f| f == expected), "missing {expected} in {fields:?}");
        }
    }

    #[test]
    fn test_boundaries() {
        let ok = TrainingConfig { epochs: 10_000, batch: 512, imgsz: 32, workers: 32, patience: 1000, ..valid() };
        assert!(ok.schema_errors().is_empty());

        let bad = TrainingConfig { imgsz: 31, ..valid() };
        assert_eq!(bad.schema_errors()[0].field, "imgsz");
    }

    #[test]
    fn test_nan_learning_rate_rejected() {
        let config = TrainingConfig { lr0: Some(f64::NAN), ..valid() };
        assert_eq!(config.schema_errors()[0].field, "lr0");
    }

    #[test]
    fn test_disabled_augmentation_is_neutral() {
        let aug = AugmentationConfig { enabled: false, mosaic: 1.0, fliplr: 0.5, ..AugmentationConfig::default() };
        let effective = aug.effective();
        assert_eq!(effective.mosaic, 0.0);
        assert_eq!(effective.fliplr, 0.0);
        assert_eq!(effective.scale, 0.0);
    }

    #[test]
    fn test_validate_resolves_dataset() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("dataset")).unwrap();
        std::fs::write(temp.path().join("dataset/data.yaml"), "path: x\n").unwrap();
        let resolver = PathResolver::for_dataset_config(temp.path());

        let validated = valid().validate(&resolver).unwrap();
        assert!(validated.dataset.ends_with("dataset/data.yaml"));
        assert_eq!(validated.run_name(), DEFAULT_RUN_NAME);
    }

    #[test]
    fn test_validate_reports_missing_and_escaping_dataset() {
        let temp = TempDir::new().unwrap();
        let resolver = PathResolver::for_dataset_config(temp.path());

        assert!(matches!(valid().validate(&resolver), Err(ConfigIssue::NotFound(_))));

        let escaping = TrainingConfig { data: "../other/data.yaml".to_string(), ..valid() };
        assert!(matches!(escaping.validate(&resolver), Err(ConfigIssue::OutsideRoot { .. })));

        let wrong_ext = TrainingConfig { data: "dataset/data.json".to_string(), ..valid() };
        assert!(matches!(wrong_ext.validate(&resolver), Err(ConfigIssue::DisallowedExtension { .. })));
    }

    #[test]
    fn test_load_toml_and_json() {
        let temp = TempDir::new().unwrap();
        let toml_path = temp.path().join("job.toml");
        std::fs::write(
            &toml_path,
            r#"
project_id = "fish"
data = "dataset/data.yaml"
epochs = 5

[augmentation]
enabled = false

[loss]
box = 5.0
"#,
        )
        .unwrap();
        let config = TrainingConfig::load_from_file(&toml_path).unwrap();
        assert_eq!(config.epochs, 5);
        assert_eq!(config.batch, 8);
        assert!(!config.augmentation.enabled);
        assert_eq!(config.loss.bbox, 5.0);

        let json_path = temp.path().join("job.json");
        std::fs::write(&json_path, r#"{"project_id": "fish", "data": "d.yaml", "name": "run1"}"#).unwrap();
        assert_eq!(TrainingConfig::load_from_file(&json_path).unwrap().run_name(), "run1");

        std::fs::write(
            &json_path,
            r#"{"projectId": "fish", "data": "d.yaml", "cosLr": true, "exportFormats": "onnx", "maxRetries": 2}"#,
        )
        .unwrap();
        let config = TrainingConfig::load_from_file(&json_path).unwrap();
        assert_eq!(config.project_id, "fish");
        assert!(config.cos_lr);
        assert_eq!(config.export_formats.as_deref(), Some("onnx"));
        assert_eq!(config.max_retries, Some(2));

        let written = serde_json::to_value(&config).unwrap();
        assert_eq!(written["projectId"], "fish");
        assert_eq!(written["augmentation"]["hsv_h"], 0.015);

        let other = temp.path().join("job.ini");
        std::fs::write(&other, "").unwrap();
        assert!(matches!(TrainingConfig::load_from_file(&other), Err(TrainingError::UnsupportedFormat(_))));
    }
}
