use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 渲染相关错误
    #[error("渲染错误: {0}")]
    Render(#[from] RenderError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 文件操作错误
    #[error("文件错误 ({path}): {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// JSON 解析失败
    #[error("JSON解析失败: {0}")]
    Json(#[from] serde_json::Error),
}

/// 渲染流水线中的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderStage {
    Admit,
    Evaluate,
    Launch,
    Load,
    Style,
    Paginate,
    Classify,
    Release,
}

impl fmt::Display for RenderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RenderStage::Admit => "admit",
            RenderStage::Evaluate => "evaluate",
            RenderStage::Launch => "launch",
            RenderStage::Load => "load",
            RenderStage::Style => "style",
            RenderStage::Paginate => "paginate",
            RenderStage::Classify => "classify",
            RenderStage::Release => "release",
        };
        f.write_str(name)
    }
}

/// 单次渲染的致命错误
///
/// 只有这一类错误会以 `ok: false` 的形式返回给调用方，
/// 其余错误都在流水线内部被吸收。
#[derive(Debug, Error)]
pub enum RenderError {
    /// 渲染引擎启动失败或未能产出结果
    #[error("渲染引擎错误 ({stage}): {message}")]
    Engine { stage: RenderStage, message: String },
    /// 超过端到端时限
    #[error("渲染超时 ({stage}): 已耗时 {elapsed_ms}ms")]
    Timeout { stage: RenderStage, elapsed_ms: u64 },
    /// 调用方取消
    #[error("渲染已取消")]
    Cancelled,
}

impl RenderError {
    /// 包装引擎层错误
    pub fn engine(stage: RenderStage, source: impl fmt::Display) -> Self {
        RenderError::Engine {
            stage,
            message: source.to_string(),
        }
    }

    /// 出错的阶段
    pub fn stage(&self) -> Option<RenderStage> {
        match self {
            RenderError::Engine { stage, .. } | RenderError::Timeout { stage, .. } => Some(*stage),
            RenderError::Cancelled => None,
        }
    }
}

/// 资源清理失败：只记录日志，从不向上抛出
#[derive(Debug, Error)]
#[error("资源清理失败 ({resource}): {message}")]
pub struct CleanupWarning {
    pub resource: String,
    pub message: String,
}

impl CleanupWarning {
    pub fn new(resource: impl Into<String>, source: impl fmt::Display) -> Self {
        Self {
            resource: resource.into(),
            message: source.to_string(),
        }
    }
}

/// 单个指令求值失败
///
/// 求值器会吸收这些错误，并原样保留出错的片段。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectiveError {
    /// 指令属性为空
    #[error("指令 {attr} 的表达式为空")]
    EmptyExpression { attr: &'static str },
    /// 无法识别的函数调用语法
    #[error("无法解析函数调用: {expr}")]
    MalformedCall { expr: String },
    /// 函数参数不合法
    #[error("函数 {function} 参数错误: {reason}")]
    InvalidArguments { function: String, reason: String },
    /// 条件表达式不合法
    #[error("无法解析条件表达式: {expr}")]
    MalformedCondition { expr: String },
    /// 嵌套的 data-repeat（只支持单层重复）
    #[error("不支持嵌套的 data-repeat: {path}")]
    NestedRepeat { path: String },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置项取值不合法
    #[error("配置项 {key} 取值不合法: {reason}")]
    InvalidValue { key: &'static str, reason: String },
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_error_stage() {
        let err = RenderError::engine(RenderStage::Launch, "no chrome");
        assert_eq!(err.stage(), Some(RenderStage::Launch));
        assert!(err.to_string().contains("launch"));
        assert_eq!(RenderError::Cancelled.stage(), None);
    }

    #[test]
    fn test_app_error_wraps_render_error() {
        let err: AppError = RenderError::Timeout {
            stage: RenderStage::Load,
            elapsed_ms: 1200,
        }
        .into();
        assert!(err.to_string().contains("1200ms"));
    }
}
