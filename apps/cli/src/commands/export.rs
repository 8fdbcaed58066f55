//! Export command implementation.

use crate::commands::ExportArgs;
use anyhow::{Context, Result};
use colored::Colorize;
use labelforge_core::{ExportEngine, Settings, Split, cleanup_pending_deletions};

/// Execute the export command.
///
/// The export does blocking file I/O and image decoding, so it runs on the
/// blocking pool.
pub async fn execute(settings: &Settings, args: &ExportArgs) -> Result<()> {
    let options = args.to_options(settings);
    let projects_dir = settings.projects_dir.clone();
    let project = args.project.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let removed = cleanup_pending_deletions(&projects_dir);
        if removed > 0 {
            tracing::info!(removed, "Removed leftover directories from interrupted deletions");
        }
        ExportEngine::new(&projects_dir).export(&project, &options)
    })
    .await
    .context("Export task panicked")?
    .with_context(|| format!("Failed to export project '{}'", args.project))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    let stats = &outcome.stats;
    println!();
    println!("{}", "Export complete".bold().green());
    println!("  Dataset:   {}", outcome.path.display().to_string().cyan());
    println!("  Manifest:  {}", outcome.manifest.display().to_string().dimmed());
    println!("  Images:    {}", stats.images);
    for split in Split::ALL {
        let s = stats.split(split);
        if s.images > 0 {
            println!(
                "    {:<6} {} images, {} objects, {} keypoints",
                split.as_str(),
                s.images,
                s.objects,
                s.keypoints
            );
        }
    }
    println!("  Objects:   {}", stats.objects);
    println!("  Keypoints: {} placed of {} considered", stats.keypoints, stats.keypoints_considered);
    if stats.unmatched_keypoints > 0 {
        println!("  {}", format!("{} keypoints were outside every box", stats.unmatched_keypoints).yellow());
    }
    if stats.skipped_images > 0 {
        println!("  {}", format!("{} unreadable images skipped", stats.skipped_images).yellow());
    }
    println!();
    Ok(())
}
