//! Error taxonomy shared by the tableau, the interpolators and the collocation driver.
//!
//! Every failure at this layer is deterministic: the same inputs always produce the
//! same error, so nothing here is retried. Retrying with looser settings is up to the
//! calling optimizer.
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TranscriptionError {
    /// defect, point, mesh or stage index outside of its valid range
    #[error("{context}: index {index} is out of range [{lower}, {upper})")]
    InvalidIndex {
        context: &'static str,
        index: usize,
        lower: usize,
        upper: usize,
    },
    /// node or query vector is not strictly increasing, too short, or hits a node exactly
    #[error("{context}: {reason}")]
    InfeasibleNodeSet {
        context: &'static str,
        reason: String,
    },
    /// a call needs data that has not been set (or was invalidated by a failed set)
    #[error("{context}: {what} must be defined first")]
    PrerequisiteNotSet {
        context: &'static str,
        what: &'static str,
    },
    #[error("{context}: expected length {expected}, got {found}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },
    /// mesh refinement asked for more nodes than the per-interval cap allows
    #[error("interval {interval} needs {requested} mesh points, cap is {cap}")]
    RefinementCapExceeded {
        interval: usize,
        requested: usize,
        cap: usize,
    },
    #[error("unknown collocation method '{0}'")]
    UnknownMethod(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TranscriptionError {
    pub(crate) fn index(context: &'static str, index: usize, lower: usize, upper: usize) -> Self {
        TranscriptionError::InvalidIndex {
            context,
            index,
            lower,
            upper,
        }
    }

    pub(crate) fn infeasible(context: &'static str, reason: impl Into<String>) -> Self {
        TranscriptionError::InfeasibleNodeSet {
            context,
            reason: reason.into(),
        }
    }

    pub(crate) fn length(context: &'static str, expected: usize, found: usize) -> Self {
        TranscriptionError::DimensionMismatch {
            context,
            expected,
            found,
        }
    }
}
