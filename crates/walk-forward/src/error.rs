use thiserror::Error;

/// Failures surfaced by the walk-forward engine.
///
/// Insufficient-data conditions (too few in-sample trades, no accepted
/// combination) are not errors; they are recorded as skipped windows and
/// the run completes normally.
#[derive(Debug, Error)]
pub enum WfaError {
    /// Invalid configuration, detected before any window is built.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Trade input that cannot be interpreted (e.g. unparseable dates).
    #[error("invalid trade input: {0}")]
    InvalidInput(String),

    /// The caller's cancellation token was signaled. Raised at a
    /// suspension checkpoint; no partial result is produced.
    #[error("analysis cancelled after {completed_periods}/{total_periods} windows")]
    Cancelled {
        completed_periods: usize,
        total_periods: usize,
    },
}
