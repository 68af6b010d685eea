//! Domain error types for the runner.
//!
//! Failures inside the engine are reported through `RunResult`; these
//! variants cover what can go wrong around it. They travel as rootcause
//! reports so callers can add context on the way up.

use std::fmt;
use std::path::PathBuf;

/// Runner-related errors.
#[derive(Debug)]
pub enum RunnerError {
    /// The workflow file could not be read.
    ReadDefinition { path: PathBuf, details: String },
    /// The workflow file is not a valid definition document.
    ParseDefinition { path: PathBuf, details: String },
    /// The definition failed structural validation.
    InvalidWorkflow { path: PathBuf, errors: Vec<String> },
    /// The node registry could not be built.
    Registry { details: String },
    /// The run record could not be written.
    WriteRecord { path: PathBuf, details: String },
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadDefinition { path, details } => {
                write!(f, "failed to read '{}': {}", path.display(), details)
            }
            Self::ParseDefinition { path, details } => {
                write!(f, "invalid definition in '{}': {}", path.display(), details)
            }
            Self::InvalidWorkflow { path, errors } => {
                write!(
                    f,
                    "workflow '{}' has {} validation error(s): {}",
                    path.display(),
                    errors.len(),
                    errors.join("; ")
                )
            }
            Self::Registry { details } => write!(f, "node registry error: {}", details),
            Self::WriteRecord { path, details } => {
                write!(f, "failed to write run record '{}': {}", path.display(), details)
            }
        }
    }
}

impl std::error::Error for RunnerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_workflow_lists_every_error() {
        let err = RunnerError::InvalidWorkflow {
            path: PathBuf::from("flow.json"),
            errors: vec!["duplicate node id 'a'".to_string(), "cycle at 'b'".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "workflow 'flow.json' has 2 validation error(s): duplicate node id 'a'; cycle at 'b'"
        );
    }
}
