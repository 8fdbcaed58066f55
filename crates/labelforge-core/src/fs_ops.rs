//! Directory replacement that tolerates transient locks.
//!
//! Other processes (virus scanners, file explorers, an image viewer holding a
//! handle) can make a recursive delete fail with "resource busy" or
//! "permission denied" for a short while. Removal therefore renames the
//! directory out of the way first, deletes the renamed copy, and retries both
//! steps with linearly growing backoff.

use crate::error::{CoreError, CoreResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const PENDING_DELETE_MARKER: &str = "_to_delete_";

/// Retry budget for filesystem operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Delay before the second attempt; attempt `n` waits `base_delay * n`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3, base_delay: Duration::from_millis(500) }
    }
}

impl RetryPolicy {
    /// No waiting between attempts. Useful in tests.
    #[must_use]
    pub fn immediate(attempts: u32) -> Self {
        Self { attempts, base_delay: Duration::ZERO }
    }

    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// What happened to a directory passed to [`remove_dir_safely`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// Nothing was there.
    AlreadyGone,
    /// The directory is gone.
    Removed,
    /// The directory was moved aside but its contents are still locked;
    /// [`cleanup_pending_deletions`] will retry later.
    PendingCleanup(PathBuf),
}

/// Errors worth retrying: someone else briefly holds the directory.
#[must_use]
pub fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::PermissionDenied | ErrorKind::ResourceBusy | ErrorKind::DirectoryNotEmpty
    )
}

/// Remove `dir` using rename-then-delete with retries.
///
/// Sleeps the calling thread between attempts.
pub fn remove_dir_safely(dir: &Path, policy: RetryPolicy) -> CoreResult<RemovalOutcome> {
    if !dir.exists() {
        return Ok(RemovalOutcome::AlreadyGone);
    }

    let temp = pending_delete_path(dir);
    debug!(from = %dir.display(), to = %temp.display(), "Moving directory aside for removal");

    let mut attempt = 1;
    loop {
        match std::fs::rename(dir, &temp) {
            Ok(()) => break,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(RemovalOutcome::AlreadyGone),
            Err(e) if is_transient(&e) && attempt < policy.attempts => {
                warn!(
                    path = %dir.display(),
                    attempt,
                    attempts = policy.attempts,
                    error = %e,
                    "Rename failed, retrying"
                );
                std::thread::sleep(policy.delay_for(attempt));
                attempt += 1;
            }
            Err(e) if is_transient(&e) => {
                info!(path = %dir.display(), "Rename kept failing, trying direct removal");
                return match std::fs::remove_dir_all(dir) {
                    Ok(()) => Ok(RemovalOutcome::Removed),
                    Err(_) => Err(CoreError::RetriesExhausted {
                        operation: "directory removal",
                        path: dir.to_path_buf(),
                        attempts: policy.attempts,
                        source: e,
                    }),
                };
            }
            Err(e) => return Err(e.into()),
        }
    }

    remove_with_retry(&temp, policy)
}

/// Remove then recreate `dir` as an empty directory.
pub fn replace_dir(dir: &Path, policy: RetryPolicy) -> CoreResult<RemovalOutcome> {
    let outcome = remove_dir_safely(dir, policy)?;
    std::fs::create_dir_all(dir)?;
    Ok(outcome)
}

/// Delete leftovers of interrupted removals directly under `base`.
///
/// Returns how many were cleaned up. Failures are logged, not returned.
pub fn cleanup_pending_deletions(base: &Path) -> usize {
    let entries = match std::fs::read_dir(base) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return 0,
        Err(e) => {
            warn!(path = %base.display(), error = %e, "Could not scan for pending deletions");
            return 0;
        }
    };

    let mut cleaned = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !is_pending_delete_name(&name.to_string_lossy()) {
            continue;
        }
        let path = entry.path();
        match std::fs::remove_dir_all(&path) {
            Ok(()) => {
                info!(path = %path.display(), "Cleaned up pending deletion");
                cleaned += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Could not clean up pending deletion"),
        }
    }
    cleaned
}

fn remove_with_retry(temp: &Path, policy: RetryPolicy) -> CoreResult<RemovalOutcome> {
    let mut attempt = 1;
    loop {
        match std::fs::remove_dir_all(temp) {
            Ok(()) => return Ok(RemovalOutcome::Removed),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(RemovalOutcome::Removed),
            Err(e) if is_transient(&e) && attempt < policy.attempts => {
                warn!(path = %temp.display(), attempt, error = %e, "Removal failed, retrying");
                std::thread::sleep(policy.delay_for(attempt));
                attempt += 1;
            }
            Err(e) if is_transient(&e) => {
                warn!(path = %temp.display(), "Directory still locked, leaving it for startup cleanup");
                return Ok(RemovalOutcome::PendingCleanup(temp.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn pending_delete_path(dir: &Path) -> PathBuf {
    let name = dir.file_name().map_or_else(|| "dir".into(), |n| n.to_string_lossy().into_owned());
    let stamp = chrono::Utc::now().timestamp_millis();
    dir.with_file_name(format!("{name}{PENDING_DELETE_MARKER}{stamp}"))
}

fn is_pending_delete_name(name: &str) -> bool {
    name.rsplit_once(PENDING_DELETE_MARKER)
        .is_some_and(|(_, stamp)| !stamp.is_empty() && stamp.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_remove_missing_dir() {
        let temp = TempDir::new().unwrap();
        let outcome = remove_dir_safely(&temp.path().join("nope"), RetryPolicy::immediate(2)).unwrap();
        assert_eq!(outcome, RemovalOutcome::AlreadyGone);
    }

    #[test]
    fn test_remove_dir_with_contents() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("dataset");
        std::fs::create_dir_all(dir.join("labels/train")).unwrap();
        std::fs::write(dir.join("labels/train/000000.txt"), "0 0.5 0.5 0.1 0.1").unwrap();

        let outcome = remove_dir_safely(&dir, RetryPolicy::immediate(2)).unwrap();
        assert_eq!(outcome, RemovalOutcome::Removed);
        assert!(!dir.exists());
        // Nothing left behind next to it.
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_replace_dir_leaves_empty_dir() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("dataset");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("old.txt"), "stale").unwrap();

        replace_dir(&dir, RetryPolicy::immediate(1)).unwrap();
        assert!(dir.is_dir());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn test_cleanup_pending_deletions() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("dataset_to_delete_1700000000000/x")).unwrap();
        std::fs::create_dir_all(temp.path().join("dataset")).unwrap();
        std::fs::create_dir_all(temp.path().join("keep_to_delete_abc")).unwrap();

        assert_eq!(cleanup_pending_deletions(temp.path()), 1);
        assert!(temp.path().join("dataset").exists());
        assert!(temp.path().join("keep_to_delete_abc").exists());
    }

    #[test]
    fn test_backoff_grows_linearly() {
        let policy = RetryPolicy { attempts: 4, base_delay: Duration::from_millis(100) };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
    }

    #[test]
    fn test_transient_kinds() {
        assert!(is_transient(&std::io::Error::from(ErrorKind::PermissionDenied)));
        assert!(!is_transient(&std::io::Error::from(ErrorKind::NotFound)));
    }
}
