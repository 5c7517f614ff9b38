//! Stage errors for the archive and restore workflows.
//!
//! Both workflows keep going after a failed path, so each failure is tagged
//! with the stage it happened in for the final report.

use std::fmt;
use thiserror::Error;

/// Step of the archive/restore pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Source,
    Compress,
    Verify,
    Upload,
    Confirm,
    Rehydrate,
    Download,
    Extract,
    Cleanup,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Source => "source",
            Stage::Compress => "compress",
            Stage::Verify => "verify",
            Stage::Upload => "upload",
            Stage::Confirm => "confirm",
            Stage::Rehydrate => "rehydrate",
            Stage::Download => "download",
            Stage::Extract => "extract",
            Stage::Cleanup => "cleanup",
        };
        write!(f, "{s}")
    }
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error("{stage} failed: {message}")]
    Failed { stage: Stage, message: String },

    #[error("{stage} failed: {source}")]
    Io {
        stage: Stage,
        #[source]
        source: std::io::Error,
    },

    #[error("rehydration of {name} not finished after {waited_secs}s")]
    Timeout { name: String, waited_secs: u64 },
}

impl StageError {
    pub fn failed(stage: Stage, message: impl fmt::Display) -> StageError {
        StageError::Failed {
            stage,
            message: message.to_string(),
        }
    }

    pub fn io(stage: Stage, source: std::io::Error) -> StageError {
        StageError::Io { stage, source }
    }

    pub fn stage(&self) -> Stage {
        match self {
            StageError::Failed { stage, .. } | StageError::Io { stage, .. } => *stage,
            StageError::Timeout { .. } => Stage::Rehydrate,
        }
    }
}

/// Attach a stage to a boxed error.
pub trait StageContext<T> {
    fn stage(self, stage: Stage) -> Result<T, StageError>;
}

impl<T> StageContext<T> for Result<T, Box<dyn std::error::Error>> {
    fn stage(self, stage: Stage) -> Result<T, StageError> {
        self.map_err(|e| StageError::failed(stage, e))
    }
}

impl<T> StageContext<T> for std::io::Result<T> {
    fn stage(self, stage: Stage) -> Result<T, StageError> {
        self.map_err(|e| StageError::io(stage, e))
    }
}
