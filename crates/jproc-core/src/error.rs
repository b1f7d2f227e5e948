//! Error types for jproc-core operations.
//!
//! - [`ConfigError`] rejects a steps document before anything is mutated.
//! - [`StepError`] is raised inside a single step and is contained by the
//!   engine; the remaining steps still run.
//! - [`PipelineError`] and [`MergeError`] cover the file boundary.

use crate::reader::ReaderError;
use crate::runtime::EvalError;
use crate::steps::StepKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// One rejected entry of a steps document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepIssue {
    pub code: String,
    pub message: String,
    pub step_index: usize,
    pub step_type: Option<String>,
}

impl StepIssue {
    pub(crate) fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        step_index: usize,
        step_type: Option<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            step_index,
            step_type,
        }
    }
}

impl fmt::Display for StepIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {}: {}", self.step_index, self.message)
    }
}

/// The steps document itself is unusable. Nothing runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid steps configuration: not an object")]
    NotAnObject,

    #[error("invalid steps configuration: 'steps' property missing or not an array")]
    MissingSteps,

    #[error("invalid steps configuration: {}", join_issues(.0))]
    InvalidSteps(Vec<StepIssue>),
}

impl ConfigError {
    /// Per-index issues, empty for document-level failures.
    pub fn issues(&self) -> &[StepIssue] {
        match self {
            ConfigError::InvalidSteps(issues) => issues,
            _ => &[],
        }
    }
}

fn join_issues(issues: &[StepIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure while executing one step.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    #[error("malformed {kind} step: {message}")]
    Malformed { kind: StepKind, message: String },

    #[error("expression failed: {0}")]
    Expression(#[from] EvalError),

    #[error("invalid expression: {0}")]
    Reader(#[from] ReaderError),
}

/// Result type alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {what}: {source}")]
    Json {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("i/o error: {0}")]
    Stream(#[from] io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(what: impl Into<String>, source: serde_json::Error) -> Self {
        PipelineError::Json {
            what: what.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("no JSON input files")]
    NoInputs,

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_steps_lists_every_issue() {
        let err = ConfigError::InvalidSteps(vec![
            StepIssue::new("JPROC_E_STEP_TYPE", "unknown or missing type 'frobnicate'", 1, None),
            StepIssue::new("JPROC_E_STEP_TYPE", "unknown or missing type 'null'", 3, None),
        ]);
        let text = err.to_string();
        assert!(text.contains("step 1: unknown or missing type 'frobnicate'"));
        assert!(text.contains("step 3: unknown or missing type 'null'"));
        assert_eq!(err.issues().len(), 2);
    }

    #[test]
    fn document_level_errors_have_no_issues() {
        assert!(ConfigError::MissingSteps.issues().is_empty());
    }
}
