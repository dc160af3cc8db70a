pub mod guard;
pub mod history;

pub use guard::{Classification, PerformanceGuard, PerformanceLevel, PerformanceThresholds};
pub use history::{PerformanceHistory, PerformanceRecord, PerformanceSummary};
