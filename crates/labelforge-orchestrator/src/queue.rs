//! Durable training job queue.
//!
//! Jobs are ordered running first, then by descending priority, then by
//! creation time (ties broken by insertion sequence). At most one job is
//! `running` at a time. A failed job that goes back to pending waits out a
//! backoff (base delay times its retry count) before it is eligible again.
//! Every mutation is written to disk; persistence failures are logged and
//! never surface to callers.

use crate::error::QueueError;
use chrono::{DateTime, TimeDelta, Utc};
use labelforge_training::{JobId, TrainingConfig};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

/// Priority of a job (higher value = dequeued earlier).
pub type Priority = i64;

/// Retry delay base unless [`JobQueue::with_retry_backoff`] sets one.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Lifecycle of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Completed, failed and cancelled jobs never change again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued training job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub config: TrainingConfig,
    pub priority: Priority,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Earliest time a retried job may run again.
    #[serde(default)]
    pub retry_at: Option<DateTime<Utc>>,
    /// Insertion order; breaks `created_at` ties.
    pub sequence: u64,
}

impl Job {
    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.config.project_id
    }

    /// Pending and not waiting out a retry delay.
    #[must_use]
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.retry_at.is_none_or(|at| at <= now)
    }

    fn sort_key(&self) -> (bool, Reverse<Priority>, DateTime<Utc>, u64) {
        (self.status != JobStatus::Running, Reverse(self.priority), self.created_at, self.sequence)
    }
}

/// Queue notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    JobAdded(Job),
    JobStarted(Job),
    /// A failed run went back to pending with `retry_count` incremented.
    JobRetrying(Job),
    JobCompleted(Job),
    JobFailed(Job),
    JobCancelled(Job),
    JobRemoved(JobId),
    /// Pending job ids in their new order.
    QueueReordered(Vec<JobId>),
}

/// Counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub current_job_id: Option<JobId>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueFile {
    #[serde(default)]
    jobs: Vec<Job>,
    #[serde(default)]
    current_job_id: Option<JobId>,
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<JobId, Job>,
    current: Option<JobId>,
    next_sequence: u64,
}

impl QueueState {
    fn sorted(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.values().cloned().collect();
        jobs.sort_by_key(Job::sort_key);
        jobs
    }

    fn pending_ids(&self) -> Vec<JobId> {
        self.sorted().into_iter().filter(|j| j.status == JobStatus::Pending).map(|j| j.id).collect()
    }

    fn next_ready(&self, now: DateTime<Utc>) -> Option<Job> {
        self.sorted().into_iter().find(|j| j.is_ready(now))
    }

    fn running_id(&self) -> Option<JobId> {
        self.jobs.values().find(|j| j.status == JobStatus::Running).map(|j| j.id.clone())
    }

    fn job_mut(&mut self, id: &JobId) -> Result<&mut Job, QueueError> {
        self.jobs.get_mut(id).ok_or_else(|| QueueError::NotFound(id.clone()))
    }
}

/// Durable priority queue of training jobs.
pub struct JobQueue {
    /// Backing file; `None` keeps the queue in memory only.
    path: Option<PathBuf>,
    /// Retry budget for jobs whose config does not set one.
    default_max_retries: u32,
    retry_backoff: Duration,
    state: Mutex<QueueState>,
    events: broadcast::Sender<QueueEvent>,
}

impl JobQueue {
    /// Opens the queue stored at `path`.
    ///
    /// A missing file is an empty queue, and so is a corrupt one (the
    /// corruption is logged). Jobs that were `running` when the previous
    /// process died are put back to `pending`.
    ///
    /// # Arguments
    /// * `path` - Queue file location
    /// * `default_max_retries` - Retry budget for jobs that do not set one
    #[must_use]
    pub fn open(path: impl Into<PathBuf>, default_max_retries: u32) -> Self {
        let path = path.into();
        let state = load_state(&path);
        info!(path = %path.display(), jobs = state.jobs.len(), "Loaded job queue");
        Self::with_state(Some(path), default_max_retries, state)
    }

    /// Creates a queue that is never written to disk.
    #[must_use]
    pub fn in_memory(default_max_retries: u32) -> Self {
        Self::with_state(None, default_max_retries, QueueState::default())
    }

    fn with_state(path: Option<PathBuf>, default_max_retries: u32, state: QueueState) -> Self {
        let (events, _) = broadcast::channel(100);
        Self { path, default_max_retries, retry_backoff: DEFAULT_RETRY_BACKOFF, state: Mutex::new(state), events }
    }

    /// Delay before the first retry of a failed job; the n-th retry waits
    /// `n` times as long.
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Subscribes to queue events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Adds a pending job.
    ///
    /// # Arguments
    /// * `config` - Training configuration to run
    /// * `priority` - Higher runs earlier
    pub async fn enqueue(&self, config: TrainingConfig, priority: Priority) -> Job {
        let mut state = self.state.lock().await;
        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let job = Job {
            id: JobId::new(),
            max_retries: config.max_retries.unwrap_or(self.default_max_retries),
            config,
            priority,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            retry_count: 0,
            retry_at: None,
            sequence,
        };
        state.jobs.insert(job.id.clone(), job.clone());
        self.persist(&state);
        drop(state);

        info!(job_id = %job.id, project_id = %job.project_id(), priority, "Job added to queue");
        self.emit(QueueEvent::JobAdded(job.clone()));
        job
    }

    pub async fn get(&self, id: &JobId) -> Option<Job> {
        self.state.lock().await.jobs.get(id).cloned()
    }

    /// All jobs in queue order.
    pub async fn list(&self) -> Vec<Job> {
        self.state.lock().await.sorted()
    }

    /// Pending jobs in the order they would run.
    pub async fn pending(&self) -> Vec<Job> {
        self.list().await.into_iter().filter(|j| j.status == JobStatus::Pending).collect()
    }

    /// The job that would run next, without changing anything. Jobs still
    /// waiting out a retry delay are skipped.
    pub async fn next_ready(&self) -> Option<Job> {
        self.state.lock().await.next_ready(Utc::now())
    }

    /// Time until the earliest waiting retry becomes ready, if any job is
    /// waiting.
    pub async fn next_retry_in(&self) -> Option<Duration> {
        let now = Utc::now();
        let state = self.state.lock().await;
        state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .filter_map(|j| j.retry_at)
            .filter(|at| *at > now)
            .min()
            .map(|at| (at - now).to_std().unwrap_or_default())
    }

    pub async fn current_job_id(&self) -> Option<JobId> {
        self.state.lock().await.current.clone()
    }

    /// Takes the next ready job and marks it running.
    ///
    /// Returns `None` when nothing is ready or another job already holds
    /// the running slot.
    pub async fn dequeue_next(&self) -> Option<Job> {
        let mut state = self.state.lock().await;
        if state.running_id().is_some() {
            return None;
        }
        let id = state.next_ready(Utc::now())?.id;
        let job = self.start_locked(&mut state, &id).ok()?;
        drop(state);
        self.emit(QueueEvent::JobStarted(job.clone()));
        Some(job)
    }

    /// Marks a pending job as running, even one still waiting out its retry
    /// delay.
    pub async fn mark_running(&self, id: &JobId) -> Result<Job, QueueError> {
        let mut state = self.state.lock().await;
        let job = self.start_locked(&mut state, id)?;
        drop(state);
        self.emit(QueueEvent::JobStarted(job.clone()));
        Ok(job)
    }

    fn start_locked(&self, state: &mut QueueState, id: &JobId) -> Result<Job, QueueError> {
        if let Some(running) = state.running_id() {
            if &running != id {
                return Err(QueueError::SlotTaken(running));
            }
        }
        let job = state.job_mut(id)?;
        if job.status != JobStatus::Pending {
            return Err(QueueError::InvalidTransition {
                id: id.clone(),
                status: job.status.to_string(),
                expected: "pending",
            });
        }
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        job.retry_at = None;
        let job = job.clone();
        state.current = Some(id.clone());
        self.persist(state);
        info!(job_id = %id, project_id = %job.project_id(), "Job started");
        Ok(job)
    }

    /// Records the end of a running job.
    ///
    /// Without an error the job completes. With an error it goes back to
    /// pending while retries remain, not eligible before its backoff has
    /// passed; otherwise it fails.
    pub async fn mark_finished(&self, id: &JobId, error: Option<String>) -> Result<Job, QueueError> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(id)?;
        if job.status != JobStatus::Running {
            return Err(QueueError::InvalidTransition {
                id: id.clone(),
                status: job.status.to_string(),
                expected: "running",
            });
        }

        let event = match error {
            None => {
                job.status = JobStatus::Completed;
                job.completed_at = Some(Utc::now());
                info!(job_id = %id, "Job completed");
                QueueEvent::JobCompleted(job.clone())
            }
            Some(err) if job.retry_count < job.max_retries => {
                job.retry_count += 1;
                let delay = self.retry_backoff.saturating_mul(job.retry_count);
                job.status = JobStatus::Pending;
                job.started_at = None;
                job.retry_at = Utc::now().checked_add_signed(TimeDelta::from_std(delay).unwrap_or(TimeDelta::zero()));
                job.error = Some(err);
                info!(
                    job_id = %id,
                    retry = job.retry_count,
                    max_retries = job.max_retries,
                    delay_ms = delay.as_millis(),
                    "Job will retry"
                );
                QueueEvent::JobRetrying(job.clone())
            }
            Some(err) => {
                job.status = JobStatus::Failed;
                job.completed_at = Some(Utc::now());
                info!(job_id = %id, error = %err, "Job failed");
                job.error = Some(err);
                QueueEvent::JobFailed(job.clone())
            }
        };
        let job = job.clone();

        if state.current.as_ref() == Some(id) {
            state.current = None;
        }
        self.persist(&state);
        drop(state);

        self.emit(event);
        Ok(job)
    }

    /// Fails a running job without spending its retry budget, e.g. when the
    /// operator stopped it or its config became invalid.
    pub async fn mark_aborted(&self, id: &JobId, reason: &str) -> Result<Job, QueueError> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(id)?;
        if job.status != JobStatus::Running {
            return Err(QueueError::InvalidTransition {
                id: id.clone(),
                status: job.status.to_string(),
                expected: "running",
            });
        }
        job.status = JobStatus::Failed;
        job.completed_at = Some(Utc::now());
        job.error = Some(reason.to_string());
        let job = job.clone();
        if state.current.as_ref() == Some(id) {
            state.current = None;
        }
        self.persist(&state);
        drop(state);

        info!(job_id = %id, reason, "Job aborted");
        self.emit(QueueEvent::JobFailed(job.clone()));
        Ok(job)
    }

    /// Cancels a pending job.
    pub async fn cancel(&self, id: &JobId) -> Result<Job, QueueError> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(id)?;
        match job.status {
            JobStatus::Running => return Err(QueueError::Running(id.clone())),
            status if status.is_terminal() => {
                return Err(QueueError::AlreadyFinished { id: id.clone(), status: status.to_string() });
            }
            _ => {}
        }
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(Utc::now());
        let job = job.clone();
        self.persist(&state);
        drop(state);

        info!(job_id = %id, "Job cancelled");
        self.emit(QueueEvent::JobCancelled(job.clone()));
        Ok(job)
    }

    /// Deletes a job that is not running.
    pub async fn remove(&self, id: &JobId) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        match state.jobs.get(id) {
            None => return Err(QueueError::NotFound(id.clone())),
            Some(job) if job.status == JobStatus::Running => return Err(QueueError::Running(id.clone())),
            Some(_) => {}
        }
        state.jobs.remove(id);
        self.persist(&state);
        drop(state);

        debug!(job_id = %id, "Job removed");
        self.emit(QueueEvent::JobRemoved(id.clone()));
        Ok(())
    }

    /// Moves the pending job at `from` to `to` and rewrites pending
    /// priorities as `len - index` so the new order sticks.
    ///
    /// # Arguments
    /// * `from` - Index in [`pending`](Self::pending) order
    /// * `to` - Target index in the same list
    pub async fn reorder(&self, from: usize, to: usize) -> Result<Vec<JobId>, QueueError> {
        let mut state = self.state.lock().await;
        let mut order = state.pending_ids();
        let len = order.len();
        if from >= len || to >= len {
            return Err(QueueError::InvalidIndex { from, to, len });
        }

        let moved = order.remove(from);
        order.insert(to, moved);
        for (index, id) in order.iter().enumerate() {
            let priority = Priority::try_from(len - index).unwrap_or(Priority::MAX);
            if let Some(job) = state.jobs.get_mut(id) {
                job.priority = priority;
            }
        }
        self.persist(&state);
        drop(state);

        debug!(from, to, "Queue reordered");
        self.emit(QueueEvent::QueueReordered(order.clone()));
        Ok(order)
    }

    /// Drops completed and cancelled jobs. Returns how many were removed.
    pub async fn clear_finished(&self) -> usize {
        let mut state = self.state.lock().await;
        let before = state.jobs.len();
        state.jobs.retain(|_, job| !matches!(job.status, JobStatus::Completed | JobStatus::Cancelled));
        let removed = before - state.jobs.len();
        if removed > 0 {
            self.persist(&state);
        }
        removed
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        let mut stats = QueueStats {
            total: state.jobs.len(),
            current_job_id: state.current.clone(),
            ..QueueStats::default()
        };
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    fn emit(&self, event: QueueEvent) {
        let _ = self.events.send(event);
    }

    fn persist(&self, state: &QueueState) {
        let Some(path) = &self.path else {
            return;
        };
        let mut jobs: Vec<Job> = state.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.sequence);
        let file = QueueFile { jobs, current_job_id: state.current.clone() };

        if let Err(e) = write_atomically(path, &file) {
            warn!(path = %path.display(), error = %e, "Failed to save job queue");
        }
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("path", &self.path)
            .field("default_max_retries", &self.default_max_retries)
            .field("retry_backoff", &self.retry_backoff)
            .finish_non_exhaustive()
    }
}

fn write_atomically(path: &Path, file: &QueueFile) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(file)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)
}

fn load_state(path: &Path) -> QueueState {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return QueueState::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read job queue, starting empty");
            return QueueState::default();
        }
    };
    let file: QueueFile = match serde_json::from_slice(&bytes) {
        Ok(file) => file,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Job queue file is corrupt, starting empty");
            return QueueState::default();
        }
    };

    let mut state = QueueState::default();
    for mut job in file.jobs {
        if job.status == JobStatus::Running {
            debug!(job_id = %job.id, "Recovering interrupted job as pending");
            job.status = JobStatus::Pending;
            job.started_at = None;
        }
        state.next_sequence = state.next_sequence.max(job.sequence + 1);
        state.jobs.insert(job.id.clone(), job);
    }
    // Nothing survives a restart in the running state.
    state.current = None;
    state
}
