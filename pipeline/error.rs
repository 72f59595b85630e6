//! The error surface of `RiskPipeline`. Stage errors convert into one of a
//! small set of kinds a service layer can map onto its own responses.

use crate::config::ConfigError;
use crate::features::frame::FrameError;
use crate::features::snapshot::SnapshotError;
use crate::model::artifact::StoreError;
use crate::model::select::SelectionError;
use crate::source::SourceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Schema error: {0}")]
    Schema(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Training failed: {0}")]
    Training(#[from] SelectionError),
    #[error("No trained model is available. Train or load a model first.")]
    NotTrained,
    #[error("Patient '{0}' was not found in the processed data.")]
    NotFound(String),
    #[error("Model store error: {0}")]
    Store(#[from] StoreError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Data source error: {0}")]
    Source(#[from] SourceError),
}

impl From<FrameError> for PipelineError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::ConflictingColumnType(_) => Self::Schema(e.to_string()),
            FrameError::Empty | FrameError::DuplicateDate { .. } | FrameError::PolarsError(_) => {
                Self::Validation(e.to_string())
            }
        }
    }
}

impl From<SnapshotError> for PipelineError {
    fn from(e: SnapshotError) -> Self {
        match e {
            SnapshotError::MissingOutcome(_) => Self::Schema(e.to_string()),
            SnapshotError::Empty { .. } => Self::Validation(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Schema,
    Validation,
    Training,
    NotTrained,
    NotFound,
    Store,
    Config,
    Source,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Schema(_) => ErrorKind::Schema,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Training(_) => ErrorKind::Training,
            Self::NotTrained => ErrorKind::NotTrained,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Store(_) => ErrorKind::Store,
            Self::Config(_) => ErrorKind::Config,
            Self::Source(_) => ErrorKind::Source,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Serializable form of a `PipelineError`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&PipelineError> for ErrorReport {
    fn from(e: &PipelineError) -> Self {
        e.report()
    }
}
