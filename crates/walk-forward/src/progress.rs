use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::models::AnalysisWindow;

/// Per-window lifecycle phase reported through the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AnalysisPhase {
    Segmenting,
    Optimizing,
    Evaluating,
    Completed,
}

/// Progress payload emitted at every phase transition and at every
/// suspension point inside the combination loop.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub phase: AnalysisPhase,
    /// 1-based index of the window being processed.
    pub current_period: usize,
    pub total_periods: usize,
    pub tested_combinations: Option<u64>,
    pub total_combinations: Option<u64>,
    pub window: Option<AnalysisWindow>,
    pub message: Option<String>,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Shared cancellation flag checked at every suspension point.
///
/// Clones observe the same underlying flag, so the caller keeps one handle
/// and hands another to the running analysis.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
