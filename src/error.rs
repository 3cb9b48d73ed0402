use chrono::{DateTime, Utc};
use thiserror::Error;

/// Engine-level error taxonomy.
///
/// The pure aggregation and series code never fails on validated input; every
/// failure originates either at a validation boundary (`InvalidWindow`,
/// `UnknownPeriod`) or at a store boundary (`Upstream`).
#[derive(Debug, Error)]
pub enum TrendError {
    /// Window bounds were reversed or empty. Rejected up front, never clamped.
    #[error("invalid window: start {start} is not before end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// An unrecognized period token. Rejected at the boundary, never defaulted.
    #[error("unknown period {0:?} (expected WEEK or WEEKEND)")]
    UnknownPeriod(String),

    /// The Event Store or Report Store failed. Retryable from the caller's
    /// point of view.
    #[error("upstream store unavailable: {0}")]
    Upstream(String),
}

impl TrendError {
    pub fn upstream(err: impl std::fmt::Display) -> Self {
        TrendError::Upstream(err.to_string())
    }

    /// Whether a caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TrendError::Upstream(_))
    }
}
