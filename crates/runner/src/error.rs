use std::time::Duration;

use thiserror::Error;

/// Failure of the sandbox itself. A script's own runtime errors are ordinary output.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to prepare script: {0}")]
    Artifact(#[source] std::io::Error),
    #[error("failed to launch interpreter: {0}")]
    Launch(#[source] std::io::Error),
    #[error("failed to collect output: {0}")]
    Collect(#[source] std::io::Error),
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),
}
