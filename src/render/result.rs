//! 渲染结果与结构化渲染日志

use chrono::{DateTime, Local};
use serde::Serialize;

use super::admission::AdmissionSnapshot;
use super::options::PageOptions;
use crate::error::RenderStage;
use crate::performance::{Classification, PerformanceLevel};
use crate::template::Diagnostic;

/// 一次渲染的结果；调用方总能拿到它
#[derive(Debug, Clone, Serialize)]
pub struct RenderResult {
    pub ok: bool,
    /// PDF 内容，不进入序列化输出
    #[serde(skip)]
    pub buffer: Option<Vec<u8>>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
    pub estimated_pages: u32,
    pub performance_level: Option<PerformanceLevel>,
    pub render_log: RenderLog,
}

impl RenderResult {
    pub fn buffer_len(&self) -> usize {
        self.buffer.as_ref().map(Vec::len).unwrap_or(0)
    }

    /// 序列化为 JSON，供外部日志系统采集
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// 渲染日志中的一条记录
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub at: DateTime<Local>,
    /// 距渲染开始的毫秒数
    pub offset_ms: u64,
    pub stage: RenderStage,
    pub level: LogLevel,
    pub message: String,
    pub in_flight: usize,
}

/// 结构化渲染日志
#[derive(Debug, Clone, Serialize)]
pub struct RenderLog {
    pub request_id: String,
    pub started_at: DateTime<Local>,
    pub options: PageOptions,
    /// 获得准入名额时的并发快照
    pub admission: Option<AdmissionSnapshot>,
    pub entries: Vec<LogEntry>,
    pub diagnostics: Vec<Diagnostic>,
    pub classification: Option<Classification>,
    /// 内容加载超时后按“已有内容”继续
    pub degraded: bool,
    pub cleanup_warnings: Vec<String>,
}

impl RenderLog {
    pub fn new(request_id: impl Into<String>, options: PageOptions) -> Self {
        Self {
            request_id: request_id.into(),
            started_at: Local::now(),
            options,
            admission: None,
            entries: Vec::new(),
            diagnostics: Vec::new(),
            classification: None,
            degraded: false,
            cleanup_warnings: Vec::new(),
        }
    }

    pub fn push(&mut self, stage: RenderStage, level: LogLevel, message: impl Into<String>, in_flight: usize) {
        let at = Local::now();
        let offset_ms = (at - self.started_at).num_milliseconds().max(0) as u64;
        self.entries.push(LogEntry {
            at,
            offset_ms,
            stage,
            level,
            message: message.into(),
            in_flight,
        });
    }

    /// 某阶段的全部记录
    pub fn entries_for(&self, stage: RenderStage) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(move |e| e.stage == stage)
    }
}
