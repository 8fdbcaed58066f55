//! Training orchestration: validate, launch, supervise, stop, and feed the
//! job queue.
//!
//! One subprocess per project. Each run gets a supervisor task that pumps the
//! child's stdout/stderr into the [`ProcessRegistry`], waits for the exit (or
//! a stop request) and reports the outcome back to the [`JobQueue`] when the
//! run came from it.

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::interpreter::{FixedInterpreter, InterpreterResolver};
use crate::process::{ProcessRegistry, ProcessStatus};
use crate::queue::{Job, JobQueue, Priority};
use labelforge_core::paths::validate_segment;
use labelforge_core::{ConfigIssue, PathResolver, Settings};
use labelforge_training::{
    JobId, LogKind, StderrIssue, StdoutLine, TrainingConfig, ValidatedConfig, build_args, parse_stdout_line,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{Mutex, Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long to wait for output readers after the child exited.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Directory holding one sub-directory per project.
    pub projects_dir: PathBuf,
    /// Training script passed as the interpreter's first argument.
    pub script: PathBuf,
    /// Accept dataset manifests outside the project directory.
    pub allow_external_datasets: bool,
    /// Pause before relaunching after an out-of-memory failure.
    pub oom_retry_delay: Duration,
    /// Relaunches with a halved batch before giving up.
    pub max_oom_retries: u32,
    /// Time a stopped run gets to exit after SIGTERM before it is killed.
    pub stop_grace: Duration,
}

impl OrchestratorOptions {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            projects_dir: settings.projects_dir.clone(),
            script: settings.training_script.clone(),
            allow_external_datasets: settings.allow_external_datasets,
            oom_retry_delay: Duration::from_millis(settings.oom_retry_delay_ms),
            max_oom_retries: 3,
            stop_grace: Duration::from_millis(settings.stop_grace_ms),
        }
    }
}

/// Returned by a successful launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartedRun {
    pub pid: Option<u32>,
    pub name: String,
    pub batch: u32,
}

/// What [`TrainingOrchestrator::submit`] did with a job.
#[derive(Debug, Clone, PartialEq)]
pub enum Submitted {
    Started(StartedRun),
    Queued(Job),
}

struct RunHandle {
    cancel: CancellationToken,
    done: watch::Receiver<Option<ProcessStatus>>,
}

struct Inner {
    options: OrchestratorOptions,
    registry: Arc<ProcessRegistry>,
    queue: Arc<JobQueue>,
    interpreter: Arc<dyn InterpreterResolver>,
    runs: Mutex<HashMap<String, RunHandle>>,
    wake: Notify,
    shutdown: CancellationToken,
}

enum ChildOutcome {
    Stopped,
    Exited { success: bool, out_of_memory: bool, detail: String },
}

/// Launches and supervises training subprocesses.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TrainingOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TrainingOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingOrchestrator").field("options", &self.inner.options).finish_non_exhaustive()
    }
}

impl TrainingOrchestrator {
    /// Create an orchestrator from its collaborators.
    ///
    /// # Arguments
    /// * `options` - Paths and retry behaviour
    /// * `registry` - Process state shared with readers
    /// * `queue` - Job queue fed by [`run_queue_worker`](Self::run_queue_worker)
    /// * `interpreter` - Finds the interpreter for each launch
    #[must_use]
    pub fn new(
        options: OrchestratorOptions,
        registry: Arc<ProcessRegistry>,
        queue: Arc<JobQueue>,
        interpreter: Arc<dyn InterpreterResolver>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                registry,
                queue,
                interpreter,
                runs: Mutex::new(HashMap::new()),
                wake: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Wire everything from resolved settings: file-backed queue, log files
    /// under the data directory and the configured interpreter.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        let registry = ProcessRegistry::new(settings.max_memory_logs)
            .with_log_dir(settings.log_dir(), settings.max_log_file_bytes);
        let queue = JobQueue::open(settings.queue_file(), settings.training.max_retries)
            .with_retry_backoff(Duration::from_millis(settings.retry_backoff_ms));
        Self::new(
            OrchestratorOptions::from_settings(settings),
            Arc::new(registry),
            Arc::new(queue),
            Arc::new(FixedInterpreter::new(settings.python_path.clone())),
        )
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.inner.registry
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.inner.queue
    }

    #[must_use]
    pub fn options(&self) -> &OrchestratorOptions {
        &self.inner.options
    }

    /// Check a config without launching anything.
    ///
    /// The dataset path is resolved against the project directory and must
    /// stay inside it unless external datasets are allowed.
    pub fn validate(&self, config: &TrainingConfig) -> OrchestratorResult<ValidatedConfig> {
        let errors = config.schema_errors();
        if !errors.is_empty() {
            return Err(ConfigIssue::Schema(errors).into());
        }
        validate_segment(&config.project_id, "project id")?;

        let resolver = PathResolver::for_dataset_config(self.project_root(&config.project_id))
            .allow_outside_root(self.inner.options.allow_external_datasets);
        Ok(config.validate(&resolver)?)
    }

    fn project_root(&self, project_id: &str) -> PathBuf {
        self.inner.options.projects_dir.join(project_id)
    }

    /// `output_dir` from the config (relative paths are under the project),
    /// else `<project>/runs`.
    fn output_dir(&self, config: &TrainingConfig) -> PathBuf {
        let root = self.project_root(&config.project_id);
        match &config.output_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => root.join(dir),
            None => root.join("runs"),
        }
    }

    /// Whether the project has a run in flight.
    pub async fn is_busy(&self, project_id: &str) -> bool {
        self.inner.runs.lock().await.contains_key(project_id)
    }

    /// Validate and launch a run now.
    ///
    /// Fails with [`OrchestratorError::AlreadyRunning`] when the project
    /// already has a run.
    pub async fn start(&self, config: TrainingConfig) -> OrchestratorResult<StartedRun> {
        let validated = self.validate(&config)?;
        self.launch(validated, None).await
    }

    /// One epoch with a batch of at most 2, under `<name>_dryrun`.
    pub async fn start_dry_run(&self, config: TrainingConfig) -> OrchestratorResult<StartedRun> {
        let validated = self.validate(&config)?.dry_run();
        self.launch(validated, None).await
    }

    /// Start right away when the project is idle, otherwise queue it.
    pub async fn submit(&self, config: TrainingConfig, priority: Priority) -> OrchestratorResult<Submitted> {
        let validated = self.validate(&config)?;
        if !self.is_busy(&config.project_id).await {
            match self.launch(validated, None).await {
                Ok(run) => return Ok(Submitted::Started(run)),
                Err(OrchestratorError::AlreadyRunning(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(Submitted::Queued(self.enqueue(config, priority).await?))
    }

    /// Validate and add a job to the queue.
    pub async fn enqueue(&self, config: TrainingConfig, priority: Priority) -> OrchestratorResult<Job> {
        self.validate(&config)?;
        let job = self.inner.queue.enqueue(config, priority).await;
        self.inner.wake.notify_one();
        Ok(job)
    }

    /// Request termination of a project's run and mark it stopped.
    ///
    /// The supervisor still records the exit once the child is gone.
    pub async fn stop(&self, project_id: &str) -> OrchestratorResult<()> {
        let runs = self.inner.runs.lock().await;
        let handle = runs.get(project_id).ok_or_else(|| OrchestratorError::NotRunning(project_id.to_string()))?;
        handle.cancel.cancel();
        drop(runs);

        let registry = &self.inner.registry;
        registry.append_log(project_id, LogKind::System, "Stop requested, terminating training process").await;
        registry.set_status(project_id, ProcessStatus::Stopped).await;
        info!(project_id, "Training stop requested");
        Ok(())
    }

    /// Wait until the project's current run is fully finished and return its
    /// final status. Without a run this is the registry's status.
    pub async fn wait(&self, project_id: &str) -> ProcessStatus {
        let done = self.inner.runs.lock().await.get(project_id).map(|h| h.done.clone());
        if let Some(mut done) = done {
            if let Ok(status) = done.wait_for(Option::is_some).await {
                if let Some(status) = *status {
                    return status;
                }
            }
        }
        self.inner.registry.status(project_id).await
    }

    /// Stop every run and the queue worker. Jobs that were running stay
    /// `running` in the queue file so the next start recovers them.
    pub async fn shutdown(&self) {
        let projects: Vec<String> = self.inner.runs.lock().await.keys().cloned().collect();
        for project_id in &projects {
            self.inner.registry.append_log(project_id, LogKind::System, "Shutting down, stopping training").await;
            self.inner.registry.set_status(project_id, ProcessStatus::Stopped).await;
        }
        self.inner.shutdown.cancel();
        info!(runs = projects.len(), "Orchestrator shutting down");
    }

    /// Start queued jobs whenever the slot is free, until shutdown.
    ///
    /// Wakes on enqueue, on the end of a run and when a retried job's delay
    /// has passed.
    pub async fn run_queue_worker(&self) {
        info!("Queue worker started");
        loop {
            while self.try_start_next().await.is_some() {}
            let retry_in = self.inner.queue.next_retry_in().await;
            tokio::select! {
                () = self.inner.wake.notified() => {}
                () = tokio::time::sleep(retry_in.unwrap_or_default()), if retry_in.is_some() => {
                    debug!("Retry delay elapsed");
                }
                () = self.inner.shutdown.cancelled() => break,
            }
        }
        info!("Queue worker stopped");
    }

    /// Launch the next ready job if no queued job is running and its
    /// project is idle.
    pub async fn try_start_next(&self) -> Option<StartedRun> {
        let queue = &self.inner.queue;
        if self.inner.shutdown.is_cancelled() || queue.current_job_id().await.is_some() {
            return None;
        }
        let next = queue.next_ready().await?;
        if self.is_busy(next.project_id()).await {
            debug!(job_id = %next.id, project_id = %next.project_id(), "Next job waits for its project");
            return None;
        }
        let job = match queue.mark_running(&next.id).await {
            Ok(job) => job,
            Err(e) => {
                debug!(job_id = %next.id, error = %e, "Could not claim job");
                return None;
            }
        };

        let validated = match self.validate(&job.config) {
            Ok(v) => v,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Queued job no longer valid");
                if let Err(e) = queue.mark_aborted(&job.id, &e.to_string()).await {
                    warn!(job_id = %job.id, error = %e, "Could not record job outcome");
                }
                self.inner.wake.notify_one();
                return None;
            }
        };

        match self.launch(validated, Some(job.id.clone())).await {
            Ok(run) => Some(run),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Queued job failed to launch");
                if let Err(e) = queue.mark_finished(&job.id, Some(e.to_string())).await {
                    warn!(job_id = %job.id, error = %e, "Could not record job outcome");
                }
                self.inner.wake.notify_one();
                None
            }
        }
    }

    async fn launch(&self, validated: ValidatedConfig, job_id: Option<JobId>) -> OrchestratorResult<StartedRun> {
        let project_id = validated.config.project_id.clone();
        let registry = &self.inner.registry;

        let mut runs = self.inner.runs.lock().await;
        if runs.contains_key(&project_id) {
            return Err(OrchestratorError::AlreadyRunning(project_id));
        }

        registry.begin_run(&project_id, validated.run_name()).await;
        registry.set_status(&project_id, ProcessStatus::Starting).await;

        let child = match self.spawn_child(&validated).await {
            Ok(child) => child,
            Err(e) => {
                error!(project_id = %project_id, error = %e, "Failed to launch training");
                registry.append_log(&project_id, LogKind::System, format!("Failed to start training: {e}")).await;
                registry.set_status(&project_id, ProcessStatus::Failed).await;
                return Err(e);
            }
        };

        let cancel = self.inner.shutdown.child_token();
        let (done_tx, done_rx) = watch::channel(None);
        runs.insert(project_id.clone(), RunHandle { cancel: cancel.clone(), done: done_rx });
        drop(runs);

        let run = StartedRun {
            pid: child.id(),
            name: validated.run_name().to_string(),
            batch: validated.config.batch,
        };
        self.mark_launched(&project_id, &run).await;

        let this = self.clone();
        tokio::spawn(async move {
            let status = this.supervise(validated, child, cancel, job_id).await;
            let _ = done_tx.send(Some(status));
        });
        Ok(run)
    }

    async fn mark_launched(&self, project_id: &str, run: &StartedRun) {
        let registry = &self.inner.registry;
        registry.set_pid(project_id, run.pid).await;
        registry.set_status(project_id, ProcessStatus::Running).await;
        let pid = run.pid.map_or_else(|| "?".to_string(), |p| p.to_string());
        registry
            .append_log(
                project_id,
                LogKind::System,
                format!("Training started: run '{}', batch {}, pid {pid}", run.name, run.batch),
            )
            .await;
        info!(project_id, pid = ?run.pid, run = %run.name, batch = run.batch, "Training process launched");
    }

    async fn spawn_child(&self, validated: &ValidatedConfig) -> OrchestratorResult<Child> {
        let interpreter = self.inner.interpreter.resolve().await?;
        let output_dir = self.output_dir(&validated.config);
        let args = build_args(&self.inner.options.script, validated, &output_dir);
        debug!(interpreter = %interpreter.display(), ?args, "Spawning training process");

        Command::new(&interpreter)
            .args(&args)
            .env("KMP_DUPLICATE_LIB_OK", "TRUE")
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(OrchestratorError::Spawn)
    }

    /// Follow a run (and its out-of-memory relaunches) to the end, then
    /// settle the registry and the queue.
    async fn supervise(
        self,
        mut validated: ValidatedConfig,
        mut child: Child,
        cancel: CancellationToken,
        job_id: Option<JobId>,
    ) -> ProcessStatus {
        let project_id = validated.config.project_id.clone();
        let mut oom_retries = 0;
        let mut failure = None;

        let outcome = loop {
            match self.watch_child(&project_id, &mut child, &cancel).await {
                ChildOutcome::Stopped => break ProcessStatus::Stopped,
                ChildOutcome::Exited { success: true, .. } => break ProcessStatus::Completed,
                ChildOutcome::Exited { success: false, out_of_memory, detail } => {
                    failure = Some(detail);
                    if !out_of_memory || cancel.is_cancelled() {
                        break ProcessStatus::Failed;
                    }
                    match self.relaunch_after_oom(&mut validated, &mut oom_retries, &cancel).await {
                        Some(next) => child = next,
                        None => break ProcessStatus::Failed,
                    }
                }
            }
        };

        let status = self.inner.registry.finish(&project_id, outcome).await;
        if let Some(job_id) = job_id {
            self.settle_job(&job_id, status, failure).await;
        }

        self.inner.runs.lock().await.remove(&project_id);
        self.inner.wake.notify_one();
        info!(project_id = %project_id, status = %status, "Training run finished");
        status
    }

    async fn settle_job(&self, job_id: &JobId, status: ProcessStatus, failure: Option<String>) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        let queue = &self.inner.queue;
        let result = match status {
            ProcessStatus::Completed => queue.mark_finished(job_id, None).await,
            ProcessStatus::Stopped => queue.mark_aborted(job_id, "stopped by operator").await,
            _ => {
                let reason = failure.unwrap_or_else(|| "training failed".to_string());
                queue.mark_finished(job_id, Some(reason)).await
            }
        };
        if let Err(e) = result {
            warn!(job_id = %job_id, error = %e, "Could not record job outcome");
        }
    }

    async fn watch_child(&self, project_id: &str, child: &mut Child, cancel: &CancellationToken) -> ChildOutcome {
        let out_of_memory = Arc::new(AtomicBool::new(false));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(self.clone().pump_stdout(project_id.to_string(), stdout)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(self.clone().pump_stderr(
                project_id.to_string(),
                stderr,
                Arc::clone(&out_of_memory),
            )));
        }

        let waited = tokio::select! {
            status = child.wait() => status,
            () = cancel.cancelled() => self.terminate(project_id, child).await,
        };

        for reader in readers {
            if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await.is_err() {
                warn!(project_id, "Output reader did not finish after exit");
            }
        }

        let registry = &self.inner.registry;
        let success = waited.as_ref().is_ok_and(ExitStatus::success);
        let detail = match waited {
            Ok(status) => match status.code() {
                Some(code) => format!("Training process exited with code {code}"),
                None => "Training process terminated by signal".to_string(),
            },
            Err(e) => format!("Failed to wait for training process: {e}"),
        };
        registry.append_log(project_id, LogKind::System, detail.clone()).await;

        if cancel.is_cancelled() {
            return ChildOutcome::Stopped;
        }
        ChildOutcome::Exited { success, out_of_memory: out_of_memory.load(Ordering::Relaxed), detail }
    }

    /// SIGTERM first so the trainer can save its state, SIGKILL once the
    /// grace period is over.
    async fn terminate(&self, project_id: &str, child: &mut Child) -> std::io::Result<ExitStatus> {
        if send_sigterm(project_id, child) {
            let grace = self.inner.options.stop_grace;
            if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
                return status;
            }
            warn!(project_id, ?grace, "Training process ignored SIGTERM, killing it");
            self.inner
                .registry
                .append_log(project_id, LogKind::System, "Training process did not exit in time, killing it")
                .await;
        }
        if let Err(e) = child.start_kill() {
            warn!(project_id, error = %e, "Failed to kill training process");
        }
        child.wait().await
    }

    async fn pump_stdout(self, project_id: String, stdout: ChildStdout) {
        let registry = &self.inner.registry;
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            let line = match next_line_lossy(&mut reader, &mut buf).await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!(project_id = %project_id, error = %e, "Failed to read training stdout");
                    break;
                }
            };
            match parse_stdout_line(&line) {
                StdoutLine::Blank => {}
                StdoutLine::Structured { update, summary } => {
                    registry.upsert_metric(&project_id, update).await;
                    if let Some(summary) = summary {
                        registry.append_log(&project_id, LogKind::Metric, summary).await;
                    }
                }
                StdoutLine::Malformed { payload } => {
                    debug!(project_id = %project_id, payload = %payload, "Unparseable structured log line");
                    registry.append_log(&project_id, LogKind::Stdout, line.trim()).await;
                }
                StdoutLine::Plain { text, metrics } => {
                    registry.append_log(&project_id, LogKind::Stdout, text).await;
                    for update in metrics {
                        registry.upsert_metric(&project_id, update).await;
                    }
                }
            }
        }
    }

    async fn pump_stderr(self, project_id: String, stderr: ChildStderr, out_of_memory: Arc<AtomicBool>) {
        let registry = &self.inner.registry;
        let mut reported = HashSet::new();
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            let line = match next_line_lossy(&mut reader, &mut buf).await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!(project_id = %project_id, error = %e, "Failed to read training stderr");
                    break;
                }
            };
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            registry.append_log(&project_id, LogKind::Stderr, text).await;

            let Some(issue) = StderrIssue::classify(text) else {
                continue;
            };
            if issue == StderrIssue::OutOfMemory {
                out_of_memory.store(true, Ordering::Relaxed);
            }
            if reported.insert(issue) {
                registry.append_log(&project_id, LogKind::Error, issue.label()).await;
                for hint in issue.suggestions() {
                    registry.append_log(&project_id, LogKind::Suggestion, *hint).await;
                }
            }
        }
    }

    /// Relaunch with half the batch. `None` when out of retries, the batch
    /// cannot shrink, the run was stopped meanwhile, or the relaunch failed.
    async fn relaunch_after_oom(
        &self,
        validated: &mut ValidatedConfig,
        retries: &mut u32,
        cancel: &CancellationToken,
    ) -> Option<Child> {
        let project_id = validated.config.project_id.clone();
        let registry = &self.inner.registry;
        let batch = validated.config.batch;
        let max = self.inner.options.max_oom_retries;

        if batch <= 1 || *retries >= max {
            registry
                .append_log(
                    &project_id,
                    LogKind::System,
                    format!("Out of GPU memory at batch {batch}; giving up after {retries} retries"),
                )
                .await;
            return None;
        }

        *retries += 1;
        let next_batch = batch / 2;
        let delay = self.inner.options.oom_retry_delay;
        registry
            .append_log(
                &project_id,
                LogKind::System,
                format!(
                    "Out of GPU memory, retrying with batch {next_batch} in {}ms ({retries}/{max})",
                    delay.as_millis()
                ),
            )
            .await;
        warn!(project_id = %project_id, batch, next_batch, retry = *retries, "Relaunching after out-of-memory");

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = cancel.cancelled() => return None,
        }

        *validated = validated.with_batch(next_batch);
        registry.set_status(&project_id, ProcessStatus::Starting).await;
        match self.spawn_child(validated).await {
            Ok(child) => {
                let run = StartedRun {
                    pid: child.id(),
                    name: validated.run_name().to_string(),
                    batch: next_batch,
                };
                self.mark_launched(&project_id, &run).await;
                Some(child)
            }
            Err(e) => {
                registry.append_log(&project_id, LogKind::System, format!("Failed to restart training: {e}")).await;
                None
            }
        }
    }
}

/// Next line from `reader` without its line ending, decoding invalid UTF-8
/// lossily. `None` at end of stream.
async fn next_line_lossy<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(buf);
    Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
}

/// Returns whether the signal was delivered.
#[cfg(unix)]
fn send_sigterm(project_id: &str, child: &Child) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return false;
    };
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => {
            debug!(project_id, pid, "Sent SIGTERM to training process");
            true
        }
        Err(e) => {
            warn!(project_id, pid, error = %e, "Failed to send SIGTERM");
            false
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_project_id: &str, _child: &Child) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn orchestrator(projects_dir: &std::path::Path, allow_external: bool) -> TrainingOrchestrator {
        TrainingOrchestrator::new(
            OrchestratorOptions {
                projects_dir: projects_dir.to_path_buf(),
                script: PathBuf::from("train.py"),
                allow_external_datasets: allow_external,
                oom_retry_delay: Duration::from_millis(1),
                max_oom_retries: 3,
                stop_grace: Duration::from_millis(100),
            },
            Arc::new(ProcessRegistry::new(100)),
            Arc::new(JobQueue::in_memory(0)),
            Arc::new(FixedInterpreter::new(None)),
        )
    }

    fn config(data: &str) -> TrainingConfig {
        TrainingConfig { project_id: "fish".into(), data: data.into(), ..TrainingConfig::default() }
    }

    #[test]
    fn test_validate_resolves_inside_project() {
        let temp = TempDir::new().unwrap();
        let dataset = temp.path().join("fish").join("dataset");
        std::fs::create_dir_all(&dataset).unwrap();
        std::fs::write(dataset.join("data.yaml"), "path: .\n").unwrap();

        let orch = orchestrator(temp.path(), false);
        let validated = orch.validate(&config("dataset/data.yaml")).unwrap();
        assert!(validated.dataset.ends_with("fish/dataset/data.yaml"));

        let err = orch.validate(&config("../other/data.yaml")).unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(ConfigIssue::OutsideRoot { .. })));

        let err = orch.validate(&config("dataset/missing.yaml")).unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(ConfigIssue::NotFound(_))));
    }

    #[test]
    fn test_validate_rejects_schema_and_project_id() {
        let temp = TempDir::new().unwrap();
        let orch = orchestrator(temp.path(), false);

        let err = orch.validate(&TrainingConfig { epochs: 0, ..config("d.yaml") }).unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(ConfigIssue::Schema(_))));

        let bad_project = TrainingConfig { project_id: "../etc".into(), ..config("d.yaml") };
        assert!(matches!(orch.validate(&bad_project), Err(OrchestratorError::Config(_))));
    }

    #[test]
    fn test_output_dir() {
        let temp = TempDir::new().unwrap();
        let orch = orchestrator(temp.path(), false);
        assert!(orch.output_dir(&config("d.yaml")).ends_with("fish/runs"));

        let relative = TrainingConfig { output_dir: Some("out".into()), ..config("d.yaml") };
        assert!(orch.output_dir(&relative).ends_with("fish/out"));
    }

    #[tokio::test]
    async fn test_missing_interpreter_fails_run() {
        let temp = TempDir::new().unwrap();
        let dataset = temp.path().join("fish").join("dataset");
        std::fs::create_dir_all(&dataset).unwrap();
        std::fs::write(dataset.join("data.yaml"), "path: .\n").unwrap();

        let orch = orchestrator(temp.path(), false);
        let err = orch.start(config("dataset/data.yaml")).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Environment(_)));

        let state = orch.registry().snapshot("fish").await;
        assert_eq!(state.status, ProcessStatus::Failed);
        assert!(state.logs.iter().any(|e| e.kind == LogKind::System));
        assert!(!orch.is_busy("fish").await);
    }

    #[tokio::test]
    async fn test_stop_without_run() {
        let temp = TempDir::new().unwrap();
        let orch = orchestrator(temp.path(), false);
        assert!(matches!(orch.stop("fish").await, Err(OrchestratorError::NotRunning(_))));
    }
}
