//! Command line passed to the external training program.

use crate::config::ValidatedConfig;
use std::path::Path;

/// Suffix appended to the run name of a dry run.
pub const DRY_RUN_SUFFIX: &str = "_dryrun";

impl ValidatedConfig {
    /// A one-epoch smoke test of this config with a small batch.
    #[must_use]
    pub fn dry_run(&self) -> Self {
        let mut dry = self.clone();
        dry.config.epochs = 1;
        dry.config.batch = dry.config.batch.min(2);
        dry.config.augmentation.close_mosaic = 0;
        dry.config.name = Some(format!("{}{DRY_RUN_SUFFIX}", self.run_name()));
        dry
    }

    /// Same config with a different batch size.
    #[must_use]
    pub fn with_batch(&self, batch: u32) -> Self {
        let mut next = self.clone();
        next.config.batch = batch;
        next
    }
}

/// Build the argument vector: `<script> --data <path> --model <name> ...`.
///
/// `output_dir` becomes `--project`. Augmentation values are the effective
/// ones, so a disabled block yields neutral values.
#[must_use]
pub fn build_args(script: &Path, validated: &ValidatedConfig, output_dir: &Path) -> Vec<String> {
    let cfg = &validated.config;
    let mut args = vec![
        script.to_string_lossy().into_owned(),
        "--data".to_string(),
        validated.dataset.to_string_lossy().into_owned(),
        "--model".to_string(),
        cfg.model.clone(),
        "--epochs".to_string(),
        cfg.epochs.to_string(),
        "--batch".to_string(),
        cfg.batch.to_string(),
        "--imgsz".to_string(),
        cfg.imgsz.to_string(),
        "--project".to_string(),
        output_dir.to_string_lossy().into_owned(),
        "--name".to_string(),
        cfg.run_name().to_string(),
        "--device".to_string(),
        cfg.device.clone(),
        "--workers".to_string(),
        cfg.workers.to_string(),
    ];

    let mut flag = |name: &str, on: bool| {
        if on {
            args.push(format!("--{name}"));
        }
    };
    flag("resume", cfg.resume);
    flag("cache_images", cfg.cache_images);
    flag("cos_lr", cfg.cos_lr);
    flag("rect", cfg.rect);

    let mut push = |name: &str, value: String| {
        args.push(format!("--{name}"));
        args.push(value);
    };
    push("patience", cfg.patience.to_string());
    push("optimizer", cfg.optimizer.clone());
    for (name, value) in [("lr0", cfg.lr0), ("lrf", cfg.lrf), ("momentum", cfg.momentum), ("weight_decay", cfg.weight_decay)] {
        if let Some(v) = value {
            push(name, v.to_string());
        }
    }

    let aug = cfg.augmentation.effective();
    for (name, value) in [
        ("degrees", aug.degrees),
        ("translate", aug.translate),
        ("scale", aug.scale),
        ("shear", aug.shear),
        ("perspective", aug.perspective),
        ("fliplr", aug.fliplr),
        ("flipud", aug.flipud),
        ("hsv_h", aug.hsv_h),
        ("hsv_s", aug.hsv_s),
        ("hsv_v", aug.hsv_v),
        ("mosaic", aug.mosaic),
    ] {
        push(name, value.to_string());
    }
    push("close_mosaic", aug.close_mosaic.to_string());
    for (name, value) in [
        ("mixup", aug.mixup),
        ("copy_paste", aug.copy_paste),
        ("erasing", aug.erasing),
        ("crop_fraction", aug.crop_fraction),
    ] {
        push(name, value.to_string());
    }

    push("loss_pose", cfg.loss.pose.to_string());
    push("loss_box", cfg.loss.bbox.to_string());
    push("loss_cls", cfg.loss.cls.to_string());

    if let Some(formats) = cfg.export_formats.as_deref().filter(|f| !f.is_empty()) {
        push("export_formats", formats.to_string());
    }

    args
}
