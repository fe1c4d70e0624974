//! Unified error type for the data model.
//!
//! Errors raised by the data model itself: illegal stage transitions, lookups
//! of contingencies that are not in the catalog, and invalid input data.
//! Engines and the workflow wrap these with their own context.
//!
//! # Example
//!
//! ```
//! use osa_core::{CoreError, CoreResult, StageKind, StageStatus};
//!
//! fn start(current: StageStatus) -> CoreResult<StageStatus> {
//!     current.transition(StageKind::LoadFlow, StageStatus::Running)
//! }
//!
//! assert!(start(StageStatus::Idle).is_ok());
//! assert!(matches!(
//!     start(StageStatus::Success),
//!     Err(CoreError::InvalidTransition { .. })
//! ));
//! ```

use thiserror::Error;

use crate::status::{StageKind, StageStatus};

/// Unified error type for data model operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A stage status moved backwards or skipped a step.
    #[error("invalid transition for stage {stage}: {from} -> {to}")]
    InvalidTransition {
        stage: StageKind,
        from: StageStatus,
        to: StageStatus,
    },

    /// A contingency id that the catalog does not know.
    #[error("unknown contingency: {0}")]
    UnknownContingency(String),

    /// Data validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        CoreError::Other(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(s: String) -> Self {
        CoreError::Other(s)
    }
}

impl From<&str> for CoreError {
    fn from(s: &str) -> Self {
        CoreError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Validation(err.to_string())
    }
}
