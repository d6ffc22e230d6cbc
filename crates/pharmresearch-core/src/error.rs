use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::planner::TaskId;
use crate::request::ModuleId;

/// Errors that abort a call or a whole research run.
///
/// Per-node failures are not represented here; they travel as [`ErrorInfo`]
/// values and never abort the run on their own.
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("invalid research request: {0}")]
    InvalidRequest(String),
    #[error("task '{task_id}' was recorded twice")]
    DuplicateRecord { task_id: TaskId },
    #[error("task '{task_id}' is not terminal and cannot be recorded")]
    NonTerminalRecord { task_id: TaskId },
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ResearchError {
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest(reason.into())
    }

    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    /// Whether this error signals a defect in the orchestrator itself.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateRecord { .. } | Self::NonTerminalRecord { .. }
        )
    }
}

/// Classification of a single node failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCause {
    TransientApi,
    DataNotFound,
    ModelInvocation,
    Timeout,
}

impl ErrorCause {
    /// Transient source failures and deadline overruns are worth another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::TransientApi | Self::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransientApi => "transient API error",
            Self::DataNotFound => "data not found",
            Self::ModelInvocation => "model invocation error",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one specialist invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub module: ModuleId,
    pub cause: ErrorCause,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(module: ModuleId, cause: ErrorCause, message: impl Into<String>) -> Self {
        Self {
            module,
            cause,
            message: message.into(),
        }
    }

    pub fn transient(module: ModuleId, message: impl Into<String>) -> Self {
        Self::new(module, ErrorCause::TransientApi, message)
    }

    pub fn not_found(module: ModuleId, message: impl Into<String>) -> Self {
        Self::new(module, ErrorCause::DataNotFound, message)
    }

    pub fn timeout(module: ModuleId, message: impl Into<String>) -> Self {
        Self::new(module, ErrorCause::Timeout, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.cause.is_retryable()
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let retry = if self.is_retryable() {
            "retryable"
        } else {
            "terminal"
        };
        write!(
            f,
            "{retry} {} failure in {}: {}",
            self.cause, self.module, self.message
        )
    }
}

impl std::error::Error for ErrorInfo {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification_follows_cause() {
        assert!(ErrorCause::TransientApi.is_retryable());
        assert!(ErrorCause::Timeout.is_retryable());
        assert!(!ErrorCause::DataNotFound.is_retryable());
        assert!(!ErrorCause::ModelInvocation.is_retryable());
    }

    #[test]
    fn display_names_module_and_cause() {
        let info = ErrorInfo::timeout(ModuleId::Patent, "deadline of 100ms exceeded");
        let text = info.to_string();
        assert!(text.starts_with("retryable timeout failure in patent"));
        assert!(text.contains("100ms"));
    }
}
