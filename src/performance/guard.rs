//! 性能守卫
//!
//! 按固定阈值给每次渲染的耗时分级，并把结果写入有界历史。

use std::fmt;
use std::sync::Mutex;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::history::{PerformanceHistory, PerformanceRecord, PerformanceSummary};

/// 性能等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceLevel {
    /// 低于目标耗时
    Success,
    /// 超过目标但未到警告线
    Info,
    /// 超过警告线
    Warning,
    /// 超过严重线
    Critical,
}

impl fmt::Display for PerformanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PerformanceLevel::Success => "success",
            PerformanceLevel::Info => "info",
            PerformanceLevel::Warning => "warning",
            PerformanceLevel::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// 耗时阈值（毫秒）
///
/// `per_page_allowance_ms` 对三个阈值统一生效：第一页之后每多一页，
/// 三个阈值都加上同样的额度。默认为 0，即不按页数缩放。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceThresholds {
    pub target_ms: u64,
    pub warning_ms: u64,
    pub critical_ms: u64,
    pub per_page_allowance_ms: u64,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            target_ms: 3_000,
            warning_ms: 5_000,
            critical_ms: 10_000,
            per_page_allowance_ms: 0,
        }
    }
}

impl PerformanceThresholds {
    /// 按页数折算后的阈值
    pub fn scaled_for(&self, estimated_pages: u32) -> Self {
        let extra = self
            .per_page_allowance_ms
            .saturating_mul(u64::from(estimated_pages.saturating_sub(1)));
        Self {
            target_ms: self.target_ms.saturating_add(extra),
            warning_ms: self.warning_ms.saturating_add(extra),
            critical_ms: self.critical_ms.saturating_add(extra),
            per_page_allowance_ms: self.per_page_allowance_ms,
        }
    }

    /// 阈值必须严格递增
    pub fn is_ordered(&self) -> bool {
        self.target_ms < self.warning_ms && self.warning_ms < self.critical_ms
    }
}

/// 分级结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub level: PerformanceLevel,
    pub message: String,
    pub elapsed_ms: u64,
    pub estimated_pages: u32,
    pub thresholds: PerformanceThresholds,
}

/// 性能守卫：由流水线实例持有，不是全局单例
#[derive(Debug)]
pub struct PerformanceGuard {
    thresholds: PerformanceThresholds,
    history: Mutex<PerformanceHistory>,
}

impl PerformanceGuard {
    pub fn new(thresholds: PerformanceThresholds, history_capacity: usize) -> Self {
        Self {
            thresholds,
            history: Mutex::new(PerformanceHistory::new(history_capacity)),
        }
    }

    pub fn thresholds(&self) -> PerformanceThresholds {
        self.thresholds
    }

    /// 纯分级，不写历史
    pub fn classify(&self, elapsed_ms: u64, estimated_pages: u32) -> Classification {
        let t = self.thresholds.scaled_for(estimated_pages);
        let (level, message) = if elapsed_ms < t.target_ms {
            (
                PerformanceLevel::Success,
                format!("渲染耗时 {}ms，低于目标 {}ms", elapsed_ms, t.target_ms),
            )
        } else if elapsed_ms < t.warning_ms {
            (
                PerformanceLevel::Info,
                format!(
                    "渲染耗时 {}ms，超过目标 {}ms，仍在可接受范围",
                    elapsed_ms, t.target_ms
                ),
            )
        } else if elapsed_ms < t.critical_ms {
            (
                PerformanceLevel::Warning,
                format!("渲染耗时 {}ms，超过警告线 {}ms", elapsed_ms, t.warning_ms),
            )
        } else {
            (
                PerformanceLevel::Critical,
                format!("渲染耗时 {}ms，超过严重线 {}ms", elapsed_ms, t.critical_ms),
            )
        };

        Classification {
            level,
            message,
            elapsed_ms,
            estimated_pages,
            thresholds: t,
        }
    }

    /// 分级并写入历史
    pub fn classify_and_record(
        &self,
        request_id: &str,
        elapsed_ms: u64,
        estimated_pages: u32,
        ok: bool,
    ) -> Classification {
        let classification = self.classify(elapsed_ms, estimated_pages);
        match classification.level {
            PerformanceLevel::Warning | PerformanceLevel::Critical => {
                warn!("[渲染 {}] ⚠️ {}", request_id, classification.message)
            }
            _ => debug!("[渲染 {}] {}", request_id, classification.message),
        }

        self.record(PerformanceRecord {
            request_id: request_id.to_string(),
            elapsed_ms,
            estimated_pages,
            level: classification.level,
            ok,
            recorded_at: Local::now(),
        });
        classification
    }

    pub fn record(&self, record: PerformanceRecord) {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
    }

    /// 最近 n 条记录
    pub fn recent(&self, n: usize) -> Vec<PerformanceRecord> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .last_n(n)
    }

    pub fn summary(&self, recent: usize) -> PerformanceSummary {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .summary(recent)
    }
}

impl Default for PerformanceGuard {
    fn default() -> Self {
        Self::new(PerformanceThresholds::default(), 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_levels() {
        let guard = PerformanceGuard::default();
        assert_eq!(guard.classify(500, 1).level, PerformanceLevel::Success);
        assert_eq!(guard.classify(3_000, 1).level, PerformanceLevel::Info);
        assert_eq!(guard.classify(4_999, 1).level, PerformanceLevel::Info);
        assert_eq!(guard.classify(5_000, 1).level, PerformanceLevel::Warning);
        assert_eq!(guard.classify(10_000, 1).level, PerformanceLevel::Critical);
    }

    #[test]
    fn test_default_thresholds_ignore_page_count() {
        let guard = PerformanceGuard::default();
        assert_eq!(
            guard.classify(4_000, 1).level,
            guard.classify(4_000, 50).level
        );
    }

    #[test]
    fn test_per_page_allowance_scales_all_thresholds() {
        let guard = PerformanceGuard::new(
            PerformanceThresholds {
                per_page_allowance_ms: 1_000,
                ..Default::default()
            },
            10,
        );
        let c = guard.classify(4_000, 3);
        assert_eq!(c.thresholds.target_ms, 5_000);
        assert_eq!(c.thresholds.warning_ms, 7_000);
        assert_eq!(c.thresholds.critical_ms, 12_000);
        assert_eq!(c.level, PerformanceLevel::Success);
    }

    #[test]
    fn test_classify_and_record_is_bounded() {
        let guard = PerformanceGuard::new(PerformanceThresholds::default(), 5);
        for i in 0..20 {
            guard.classify_and_record(&format!("render-{:06}", i), 100, 1, true);
        }
        let summary = guard.summary(3);
        assert_eq!(summary.count, 5);
        assert_eq!(summary.recent.len(), 3);
        assert_eq!(summary.recent[2].request_id, "render-000019");
    }

    #[test]
    fn test_thresholds_ordering() {
        assert!(PerformanceThresholds::default().is_ordered());
        let broken = PerformanceThresholds {
            warning_ms: 1_000,
            ..Default::default()
        };
        assert!(!broken.is_ordered());
    }
}
