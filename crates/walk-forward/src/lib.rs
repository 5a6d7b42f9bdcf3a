pub mod analyzer;
pub mod error;
pub mod models;
pub mod param_grid;
pub mod progress;
pub mod risk_filter;
pub mod scenario;
pub mod windows;


pub use analyzer::{DefaultStatsProvider, StatsProvider, WalkForwardAnalyzer};
pub use error::WfaError;
pub use models::*;
pub use param_grid::ParamGrid;
pub use progress::{AnalysisPhase, CancellationToken, ProgressCallback, ProgressUpdate};
pub use scenario::ScalingBaseline;
