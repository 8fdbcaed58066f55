//! YOLO pose dataset export.
//!
//! Reads a project's uploads and annotation records, assigns keypoints to
//! bboxes, partitions images into splits and writes
//! `dataset/{images,labels}/<split>/` plus `dataset/data.yaml`.
//!
//! An export replaces whatever was at the target before. A failure halfway
//! leaves a partial dataset behind; re-running the export fixes it.

pub mod annotation;
pub mod labels;
pub mod manifest;
pub mod split;

use crate::error::{CoreError, CoreResult};
use crate::fs_ops::{RemovalOutcome, RetryPolicy, replace_dir};
use crate::layout::ProjectLayout;
use crate::paths::{PathResolver, to_yolo_format};
use annotation::{AnnotationRecord, has_shapes, load_annotations};
use labels::{assign_keypoints, label_line};
use manifest::{DatasetManifest, class_names, flip_idx};
use serde::{Deserialize, Serialize};
use split::{Split, plan_splits, shuffle};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub use split::SplitPlan;

/// Image extensions picked up from `uploads/`.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// Export options. Field names follow the editor's JSON (`trainRatio`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportOptions {
    /// Write a visibility flag after each keypoint (`kpt_shape` dims 3 vs 2).
    pub include_visibility: bool,
    /// Export to `<custom_path>/dataset` instead of the project directory.
    pub custom_path: Option<String>,
    pub num_keypoints: usize,
    pub train_ratio: f64,
    pub val_ratio: f64,
    pub test_ratio: f64,
    pub shuffle: bool,
    /// Also export images without any bbox or keypoint.
    pub include_unannotated: bool,
    /// Seed for a reproducible shuffle.
    pub seed: Option<u64>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_visibility: true,
            custom_path: None,
            num_keypoints: 17,
            train_ratio: 0.8,
            val_ratio: 0.2,
            test_ratio: 0.0,
            shuffle: true,
            include_unannotated: true,
            seed: None,
        }
    }
}

impl From<&crate::settings::ExportDefaults> for ExportOptions {
    fn from(defaults: &crate::settings::ExportDefaults) -> Self {
        Self {
            num_keypoints: defaults.num_keypoints,
            train_ratio: defaults.train_ratio,
            val_ratio: defaults.val_ratio,
            test_ratio: defaults.test_ratio,
            ..Self::default()
        }
    }
}

impl ExportOptions {
    #[must_use]
    pub fn kpt_shape(&self) -> [usize; 2] {
        [self.num_keypoints, if self.include_visibility { 3 } else { 2 }]
    }
}

/// Counts for one split.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SplitStats {
    pub images: usize,
    pub objects: usize,
    pub keypoints: usize,
}

/// Export summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportStats {
    /// Images written.
    pub images: usize,
    /// Images selected for export, including skipped ones.
    pub total_images: usize,
    /// Images whose dimensions could not be read.
    pub skipped_images: usize,
    pub train: SplitStats,
    pub val: SplitStats,
    pub test: SplitStats,
    /// Bboxes written.
    pub objects: usize,
    /// Keypoints written into a slot.
    pub keypoints: usize,
    /// Keypoints with an in-range index.
    pub keypoints_considered: usize,
    /// Keypoints outside every tolerance box.
    pub unmatched_keypoints: usize,
    pub kpt_shape: [usize; 2],
}

impl ExportStats {
    fn split_mut(&mut self, split: Split) -> &mut SplitStats {
        match split {
            Split::Train => &mut self.train,
            Split::Val => &mut self.val,
            Split::Test => &mut self.test,
        }
    }

    #[must_use]
    pub fn split(&self, split: Split) -> SplitStats {
        match split {
            Split::Train => self.train,
            Split::Val => self.val,
            Split::Test => self.test,
        }
    }
}

/// Result of a successful export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportOutcome {
    /// Dataset root.
    pub path: PathBuf,
    /// `data.yaml` inside the dataset root.
    pub manifest: PathBuf,
    pub stats: ExportStats,
}

/// Exports projects under a projects directory.
#[derive(Debug, Clone)]
pub struct ExportEngine {
    projects_dir: PathBuf,
    retry: RetryPolicy,
}

struct Candidate {
    file: String,
    records: Vec<AnnotationRecord>,
}

impl ExportEngine {
    pub fn new(projects_dir: impl Into<PathBuf>) -> Self {
        Self { projects_dir: projects_dir.into(), retry: RetryPolicy::default() }
    }

    /// Retry budget for replacing the previous dataset directory.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn projects_dir(&self) -> &Path {
        &self.projects_dir
    }

    /// Where an export with `options` would write its dataset.
    pub fn dataset_dir(&self, project_id: &str, options: &ExportOptions) -> CoreResult<PathBuf> {
        let layout = ProjectLayout::new(&self.projects_dir, project_id)?;
        match options.custom_path.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            Some(custom) => {
                let base = PathResolver::new(".").allow_outside_root(true).resolve(custom)?;
                Ok(base.join("dataset"))
            }
            None => Ok(layout.dataset_dir()),
        }
    }

    /// Export `project_id` as a YOLO pose dataset.
    ///
    /// Blocks on file I/O and retry delays; async callers run it through
    /// `tokio::task::spawn_blocking`.
    pub fn export(&self, project_id: &str, options: &ExportOptions) -> CoreResult<ExportOutcome> {
        if options.num_keypoints == 0 {
            return Err(CoreError::Export("number of keypoints must be at least 1".to_string()));
        }
        // Validate ratios before anything on disk is touched.
        plan_splits(0, options.train_ratio, options.val_ratio, options.test_ratio)?;

        let layout = ProjectLayout::new(&self.projects_dir, project_id)?;
        let export_dir = self.dataset_dir(project_id, options)?;
        let uploads = list_images(&layout.uploads_dir())?;

        info!(
            project_id,
            images = uploads.len(),
            target = %export_dir.display(),
            "Starting dataset export"
        );

        if let RemovalOutcome::PendingCleanup(leftover) = replace_dir(&export_dir, self.retry)? {
            warn!(path = %leftover.display(), "Previous dataset could not be fully removed");
        }

        let all: Vec<Candidate> = uploads
            .into_iter()
            .map(|file| {
                let records = load_annotations(&layout.annotation_file(&file));
                Candidate { file, records }
            })
            .collect();

        let max_class = all
            .iter()
            .flat_map(|c| c.records.iter())
            .filter(|r| r.is_bbox())
            .map(AnnotationRecord::class_index)
            .max();
        let names = max_class.map_or_else(BTreeMap::new, |max| class_names(&layout.config_file(), max));

        let mut candidates: Vec<Candidate> = all
            .into_iter()
            .filter(|c| options.include_unannotated || has_shapes(&c.records))
            .collect();
        if options.shuffle {
            shuffle(&mut candidates, options.seed);
        }

        let plan = plan_splits(candidates.len(), options.train_ratio, options.val_ratio, options.test_ratio)?;
        debug!(train = plan.train, val = plan.val, test = plan.test, "Planned splits");

        let mut stats = ExportStats {
            total_images: candidates.len(),
            kpt_shape: options.kpt_shape(),
            ..ExportStats::default()
        };

        for (index, candidate) in candidates.iter().enumerate() {
            let split = plan.split_of(index);
            let image_path = layout.uploads_dir().join(&candidate.file);

            let (width, height) = match image_dimensions(&image_path) {
                Ok(dims) => dims,
                Err(e) => {
                    warn!(image = %candidate.file, error = %e, "Skipping image with unreadable dimensions");
                    stats.skipped_images += 1;
                    continue;
                }
            };
            let (width, height) = (f64::from(width), f64::from(height));

            let assignment = assign_keypoints(&candidate.records, options.num_keypoints);
            let lines: Vec<String> = assignment
                .boxes
                .iter()
                .map(|b| label_line(b, width, height, options.include_visibility))
                .collect();
            let placed: usize = assignment.boxes.iter().map(labels::AssignedBox::filled_slots).sum();

            let images_dir = export_dir.join("images").join(split.as_str());
            let labels_dir = export_dir.join("labels").join(split.as_str());
            std::fs::create_dir_all(&images_dir)?;
            std::fs::create_dir_all(&labels_dir)?;

            let stem = format!("{index:06}");
            let ext = Path::new(&candidate.file)
                .extension()
                .map_or_else(|| "jpg".to_string(), |e| e.to_string_lossy().into_owned());
            std::fs::write(labels_dir.join(format!("{stem}.txt")), lines.join("\n"))?;
            std::fs::copy(&image_path, images_dir.join(format!("{stem}.{ext}")))?;

            let split_stats = stats.split_mut(split);
            split_stats.images += 1;
            split_stats.objects += assignment.boxes.len();
            split_stats.keypoints += placed;

            stats.images += 1;
            stats.objects += assignment.boxes.len();
            stats.keypoints += placed;
            stats.keypoints_considered += assignment.considered;
            stats.unmatched_keypoints += assignment.unmatched;
        }

        let split_path = |split: Split| {
            (stats.split(split).images > 0).then(|| format!("images/{}", split.as_str()))
        };
        let manifest = DatasetManifest {
            path: to_yolo_format(&export_dir),
            train: split_path(Split::Train),
            val: split_path(Split::Val),
            test: split_path(Split::Test),
            kpt_shape: options.kpt_shape(),
            flip_idx: flip_idx(options.num_keypoints),
            names,
        };
        let manifest_path = export_dir.join("data.yaml");
        manifest.write(&manifest_path)?;

        info!(
            project_id,
            images = stats.images,
            total = stats.total_images,
            skipped = stats.skipped_images,
            objects = stats.objects,
            keypoints = stats.keypoints,
            "Export complete"
        );

        Ok(ExportOutcome { path: export_dir, manifest: manifest_path, stats })
    }
}

/// Supported image files in `dir`, sorted by name.
fn list_images(dir: &Path) -> CoreResult<Vec<String>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| CoreError::Export(format!("cannot read uploads at {}: {e}", dir.display())))?;

    let mut files: Vec<String> = entries
        .flatten()
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| is_supported_image(name))
        .collect();
    files.sort();
    Ok(files)
}

fn is_supported_image(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext)))
}

/// Read pixel dimensions from the image header.
fn image_dimensions(path: &Path) -> Result<(u32, u32), String> {
    image::ImageReader::open(path)
        .and_then(image::ImageReader::with_guessed_format)
        .map_err(|e| e.to_string())?
        .into_dimensions()
        .map_err(|e| e.to_string())
}
