pub mod analysis;
pub mod config;
pub mod engine;
pub mod error;
pub mod insight_cache;
pub mod listing;
pub mod locks;
pub mod progress;
pub mod remediation;
pub mod scanner;
pub mod session;
pub mod storage;

pub use analysis::Insight;
pub use config::AppConfig;
pub use engine::{OverlapEngine, ScanSummary};
pub use error::Error;
pub use progress::{ProgressReporter, SilentReporter};
pub use remediation::{
    ConflictPolicy, RemediationAction, RemediationError, RemediationRequest, RemediationResult,
    RemediationState,
};
