//! 渲染耗时历史：固定容量、丢弃最旧记录的环形缓冲区

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Local};
use serde::Serialize;

use super::guard::PerformanceLevel;

/// 单次渲染的性能记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceRecord {
    pub request_id: String,
    pub elapsed_ms: u64,
    pub estimated_pages: u32,
    pub level: PerformanceLevel,
    pub ok: bool,
    pub recorded_at: DateTime<Local>,
}

/// 历史记录汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub count: usize,
    pub average_ms: f64,
    pub max_ms: u64,
    pub failures: usize,
    pub by_level: BTreeMap<PerformanceLevel, usize>,
    pub recent: Vec<PerformanceRecord>,
}

#[derive(Debug)]
pub struct PerformanceHistory {
    capacity: usize,
    records: VecDeque<PerformanceRecord>,
}

impl PerformanceHistory {
    /// 容量至少为 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 追加一条记录，满了就丢弃最旧的
    pub fn push(&mut self, record: PerformanceRecord) {
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// 最近的 n 条记录，按时间从旧到新
    pub fn last_n(&self, n: usize) -> Vec<PerformanceRecord> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip).cloned().collect()
    }

    pub fn summary(&self, recent: usize) -> PerformanceSummary {
        if self.records.is_empty() {
            return PerformanceSummary::default();
        }

        let total: u64 = self.records.iter().map(|r| r.elapsed_ms).sum();
        let mut by_level = BTreeMap::new();
        for record in &self.records {
            *by_level.entry(record.level).or_insert(0) += 1;
        }

        PerformanceSummary {
            count: self.records.len(),
            average_ms: total as f64 / self.records.len() as f64,
            max_ms: self.records.iter().map(|r| r.elapsed_ms).max().unwrap_or(0),
            failures: self.records.iter().filter(|r| !r.ok).count(),
            by_level,
            recent: self.last_n(recent),
        }
    }
}
