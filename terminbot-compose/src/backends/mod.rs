use std::{io, path::PathBuf, process::ExitStatus};

use thiserror::Error;

pub use self::docker::DockerBackend;

mod docker;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("`{command}` failed ({status}): {stderr}")]
    Command {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("could not execute {runtime:?}: {source}")]
    Spawn {
        runtime: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unexpected output from `{command}`: {message}")]
    Output { command: String, message: String },
}

/// Phrases docker and podman print when the named object is missing.
const MISSING_OBJECT: &[&str] = &[
    "no such container",
    "no such image",
    "no such object",
    "image not known",
    "no container with name",
];

impl BackendError {
    /// Sorts a failed runtime invocation by the message it printed.
    pub fn from_failure(command: String, status: ExitStatus, stderr: &str) -> BackendError {
        let stderr = stderr.trim().to_owned();
        let lower = stderr.to_lowercase();

        if MISSING_OBJECT.iter().any(|phrase| lower.contains(phrase)) {
            BackendError::NotFound(stderr)
        } else if lower.contains("already in use") || lower.contains("conflict") {
            BackendError::Conflict(stderr)
        } else {
            BackendError::Command {
                command,
                status,
                stderr,
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }
}
