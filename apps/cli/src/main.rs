//! LabelForge CLI - dataset export and training orchestration
//!
//! This CLI provides a `labelforge` command that exports annotated projects
//! as YOLO pose datasets and runs training jobs against them.

mod commands;

use clap::{CommandFactory, Parser, Subcommand};
use labelforge_core::Settings;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use commands::{ExportArgs, LogsArgs, QueueCommand, TrainArgs, export, logs, queue, status, train};

/// LabelForge CLI - YOLO dataset export and training jobs
#[derive(Parser, Debug)]
#[command(
    name = "labelforge",
    author,
    version,
    about = "LabelForge - YOLO pose dataset export and training orchestration"
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Projects directory (overrides settings and LABELFORGE_PROJECTS_DIR)
    #[arg(long, global = true)]
    projects_dir: Option<PathBuf>,

    /// Data directory for the job queue and training logs
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Python interpreter used to run the training script
    #[arg(long, global = true)]
    python: Option<PathBuf>,

    /// Training script (overrides settings)
    #[arg(long, global = true)]
    script: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export a project as a YOLO pose dataset
    ///
    /// Writes images/<split>, labels/<split> and data.yaml under the project's
    /// dataset directory (or <custom-path>/dataset), replacing what was there.
    Export(ExportArgs),

    /// Run a training job in the foreground
    ///
    /// Streams logs and metrics until the run ends. Ctrl-C stops the run.
    Train(TrainArgs),

    /// Manage the training job queue
    #[command(subcommand)]
    Queue(QueueCommand),

    /// Show settings and queue status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Read, search and export training logs
    Logs(LogsArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Settings layers, then flags on top
    let mut settings = Settings::discover_and_load();
    if let Some(dir) = args.projects_dir {
        settings.projects_dir = dir;
    }
    if let Some(dir) = args.data_dir {
        settings.data_dir = dir;
    }
    if let Some(python) = args.python {
        settings.python_path = Some(python);
    }
    if let Some(script) = args.script {
        settings.training_script = script;
    }

    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    match command {
        Command::Export(args) => export::execute(&settings, &args).await?,
        Command::Train(args) => train::execute(&settings, &args).await?,
        Command::Queue(cmd) => queue::execute(&settings, cmd).await?,
        Command::Status { json } => status::execute(&settings, json).await?,
        Command::Logs(args) => logs::execute(&settings, &args).await?,
    }

    Ok(())
}
