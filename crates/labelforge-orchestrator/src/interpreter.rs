//! Locating the interpreter that runs the training script.

use crate::error::{OrchestratorError, OrchestratorResult};
use async_trait::async_trait;
use std::path::PathBuf;

/// Resolves the interpreter executable for a training run.
#[async_trait]
pub trait InterpreterResolver: Send + Sync {
    /// Interpreter to launch, or an environment error when none is usable.
    async fn resolve(&self) -> OrchestratorResult<PathBuf>;
}

/// Resolver backed by the configured `python_path`.
///
/// A bare program name (no path separator) is handed to the OS as is and
/// looked up on `PATH` at spawn time.
#[derive(Debug, Clone, Default)]
pub struct FixedInterpreter {
    path: Option<PathBuf>,
}

impl FixedInterpreter {
    #[must_use]
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

#[async_trait]
impl InterpreterResolver for FixedInterpreter {
    async fn resolve(&self) -> OrchestratorResult<PathBuf> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| OrchestratorError::Environment("no Python interpreter configured".to_string()))?;

        let is_bare_name = path.components().count() == 1 && !path.is_absolute();
        if !is_bare_name && !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(OrchestratorError::Environment(format!(
                "Python interpreter not found: {}",
                path.display()
            )));
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_interpreter() {
        let err = FixedInterpreter::new(None).resolve().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Environment(_)));

        let err = FixedInterpreter::new(Some("/definitely/not/python".into())).resolve().await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_bare_name_is_accepted() {
        let path = FixedInterpreter::new(Some("python3".into())).resolve().await.unwrap();
        assert_eq!(path, PathBuf::from("python3"));
    }
}
