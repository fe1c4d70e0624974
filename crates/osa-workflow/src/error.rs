//! Error types for the workflow.

use std::path::PathBuf;
use thiserror::Error;

use osa_core::{CoreError, StageKind};

/// Result type for workflow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from workflow operations.
///
/// Per-state and per-contingency failures never surface here: they are
/// recorded in the status board and result aggregates instead.
#[derive(Debug, Error)]
pub enum Error {
    /// An analysis engine failed while running a stage.
    #[error("{stage} failed: {source}")]
    Engine {
        stage: StageKind,
        #[source]
        source: anyhow::Error,
    },

    /// Worst-case clustering failed; no state can be analyzed.
    #[error("worst-case clustering failed: {0:#}")]
    Clustering(#[source] anyhow::Error),

    /// Data model error (illegal status transition, unknown contingency, ...).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Worker pool could not be created.
    #[error("worker pool error: {0}")]
    Pool(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to load a case file.
    #[error("failed to load case from {path}: {source}")]
    CaseLoad {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    pub fn engine(stage: StageKind, source: anyhow::Error) -> Self {
        Error::Engine { stage, source }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rayon::ThreadPoolBuildError> for Error {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        Error::Pool(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_name_the_stage() {
        let err = Error::engine(StageKind::LoadFlow, anyhow::anyhow!("diverged"));
        assert_eq!(err.to_string(), "LOAD_FLOW failed: diverged");
    }

    #[test]
    fn core_errors_convert() {
        let err: Error = CoreError::UnknownContingency("C3".into()).into();
        assert!(matches!(err, Error::Core(_)));
        assert!(err.to_string().contains("C3"));
    }
}
