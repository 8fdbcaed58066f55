//! Status command implementation.

use colored::Colorize;
use labelforge_core::Settings;
use labelforge_orchestrator::JobQueue;
use serde_json::json;

/// Execute the status command.
///
/// Shows the resolved settings and the state of the job queue.
pub async fn execute(settings: &Settings, json_output: bool) -> anyhow::Result<()> {
    let queue = JobQueue::open(settings.queue_file(), settings.training.max_retries);
    let stats = queue.stats().await;

    if json_output {
        let out = json!({
            "settings": {
                "projectsDir": settings.projects_dir,
                "dataDir": settings.data_dir,
                "pythonPath": settings.python_path,
                "trainingScript": settings.training_script,
                "allowExternalDatasets": settings.allow_external_datasets,
            },
            "queue": stats,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}", "LabelForge Status".bold().cyan());
    println!();

    println!("{}", "Settings:".bold());
    println!("  Projects: {}", settings.projects_dir.display().to_string().green());
    println!("  Data:     {}", settings.data_dir.display());
    match &settings.python_path {
        Some(python) => println!("  Python:   {}", python.display()),
        None => println!("  Python:   {}", "not configured (set LABELFORGE_PYTHON or --python)".yellow()),
    }
    let script = settings.training_script.display().to_string();
    if settings.training_script.exists() {
        println!("  Script:   {} {}", script, "✓".green());
    } else {
        println!("  Script:   {} {}", script, "(missing)".red());
    }
    println!();

    println!("{}", "Queue:".bold());
    println!("  Total:     {}", stats.total);
    println!("  Pending:   {}", stats.pending);
    println!("  Running:   {}", stats.running.to_string().cyan());
    println!("  Completed: {}", stats.completed.to_string().green());
    println!("  Failed:    {}", stats.failed.to_string().red());
    println!("  Cancelled: {}", stats.cancelled);
    if let Some(current) = &stats.current_job_id {
        println!("  Current:   {}", current.as_str().cyan());
    }
    println!();
    Ok(())
}
