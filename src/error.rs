//! Error types for snapshot operations.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during snapshot resolution and apply.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// Endpoint unreachable, timed out, or answered with a non-2xx status.
    #[error("network error: {0}")]
    Network(String),

    /// HTTP client failure (connect, timeout, body read).
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    /// Malformed or incomplete provider JSON.
    #[error("schema error: {0}")]
    Schema(String),

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    /// Missing Content-Length, size mismatch, no usable candidate.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Filesystem failure on a known path.
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// I/O error without a more specific path.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Missing external tool or failed tool invocation.
    #[error("dependency error: {0}")]
    Dependency(String),

    /// Invalid configuration file or value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Another run holds the node directory lock.
    #[error("{} is locked by another storysnap run ({reason})", path.display())]
    Locked { path: PathBuf, reason: String },

    /// Fatal apply-pipeline failure with recovery details.
    #[error(transparent)]
    Pipeline(#[from] Box<PipelineError>),
}

impl SnapshotError {
    pub(crate) fn fs(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SnapshotError::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Whether an adapter may skip the source and carry on.
    pub fn is_recoverable_for_adapter(&self) -> bool {
        matches!(
            self,
            SnapshotError::Network(_)
                | SnapshotError::Reqwest(_)
                | SnapshotError::Schema(_)
                | SnapshotError::SerdeJson(_)
        )
    }
}

/// A fatal failure inside the apply pipeline.
///
/// The message always names the failed step and tells the operator what state
/// the node was left in, so a manual recovery is possible.
#[derive(Debug)]
pub struct PipelineError {
    pub step: &'static str,
    pub source: SnapshotError,
    pub services_stopped: Vec<String>,
    pub backup_path: Option<PathBuf>,
    /// The backup was not restored and must be copied back by hand.
    pub backup_kept: bool,
    pub restore_error: Option<SnapshotError>,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snapshot apply failed during '{}': {}", self.step, self.source)?;
        if let Some(restore) = &self.restore_error {
            write!(f, "; restoring validator state also failed: {}", restore)?;
        }
        if self.services_stopped.is_empty() {
            write!(f, ". No services were stopped")?;
        } else {
            write!(
                f,
                ". Services are STOPPED and were not restarted: {}",
                self.services_stopped.join(", ")
            )?;
        }
        match &self.backup_path {
            Some(path) if self.backup_kept => write!(
                f,
                ". Validator state backup kept at {}; copy it back to the signing-state path before starting the node",
                path.display()
            ),
            Some(path) => write!(
                f,
                ". Validator state was restored from backup {}",
                path.display()
            ),
            None => Ok(()),
        }
    }
}

impl From<PipelineError> for SnapshotError {
    fn from(err: PipelineError) -> Self {
        SnapshotError::Pipeline(Box::new(err))
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_error_names_step_services_and_backup() {
        let err = PipelineError {
            step: "extract assets",
            source: SnapshotError::Integrity("truncated archive".into()),
            services_stopped: vec!["story".into(), "story-geth".into()],
            backup_path: Some(PathBuf::from("/home/n/.story/priv_validator_state.json.backup")),
            backup_kept: true,
            restore_error: Some(SnapshotError::Dependency("disk full".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("'extract assets'"));
        assert!(msg.contains("STOPPED"));
        assert!(msg.contains("story, story-geth"));
        assert!(msg.contains("priv_validator_state.json.backup"));
    }

    #[test]
    fn adapter_recoverability() {
        assert!(SnapshotError::Schema("x".into()).is_recoverable_for_adapter());
        assert!(!SnapshotError::Integrity("x".into()).is_recoverable_for_adapter());
    }
}
