use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::performance::PerformanceThresholds;
use crate::render::options::PageOptions;

/// 默认屏蔽的外部主机（字体、CDN），避免渲染时挂起产出空白页
pub const DEFAULT_BLOCKED_URL_PATTERNS: &[&str] = &[
    "*fonts.googleapis.com*",
    "*fonts.gstatic.com*",
    "*use.typekit.net*",
    "*cdn.jsdelivr.net*",
    "*cdnjs.cloudflare.com*",
    "*unpkg.com*",
    "*googletagmanager.com*",
    "*google-analytics.com*",
];

/// 渲染服务配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// 全进程同时进行的渲染数量上限
    pub max_concurrent_renders: usize,
    /// 单次渲染端到端时限（毫秒）
    pub render_timeout_ms: u64,
    /// 内容加载等待时限（毫秒），超时后降级而不是失败
    pub content_load_timeout_ms: u64,
    /// 启动渲染实例的时限（毫秒）
    pub launch_timeout_ms: u64,
    /// 等待归还渲染实例的时限（毫秒），超时后准入名额照常归还，清理转入后台
    pub release_timeout_ms: u64,
    /// 视口宽度
    pub viewport_width: u32,
    /// 视口高度
    pub viewport_height: u32,
    /// 设备缩放比例，同时作为打印缩放
    pub device_scale_factor: f64,
    /// 浏览器可执行文件路径，为空时自动查找
    pub chrome_executable: Option<String>,
    /// 渲染期间屏蔽的 URL 模式
    pub blocked_url_patterns: Vec<String>,
    /// 性能阈值
    pub thresholds: PerformanceThresholds,
    /// 性能历史容量
    pub history_capacity: usize,
    /// 渲染实例池大小，0 表示每次请求单独启动并销毁
    pub pool_size: usize,
    /// 实例池健康检查间隔（毫秒）
    pub health_check_interval_ms: u64,
    /// 默认页面选项
    pub page: PageOptions,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_concurrent_renders: 3,
            render_timeout_ms: 60_000,
            content_load_timeout_ms: 15_000,
            launch_timeout_ms: 20_000,
            release_timeout_ms: 10_000,
            viewport_width: 1280,
            viewport_height: 1800,
            device_scale_factor: 1.0,
            chrome_executable: None,
            blocked_url_patterns: DEFAULT_BLOCKED_URL_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            thresholds: PerformanceThresholds::default(),
            history_capacity: 100,
            pool_size: 0,
            health_check_interval_ms: 30_000,
            page: PageOptions::default(),
            verbose_logging: false,
        }
    }
}

impl RenderConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_concurrent_renders: env_parse("MAX_CONCURRENT_RENDERS").unwrap_or(default.max_concurrent_renders),
            render_timeout_ms: env_parse("RENDER_TIMEOUT_MS").unwrap_or(default.render_timeout_ms),
            content_load_timeout_ms: env_parse("CONTENT_LOAD_TIMEOUT_MS").unwrap_or(default.content_load_timeout_ms),
            launch_timeout_ms: env_parse("LAUNCH_TIMEOUT_MS").unwrap_or(default.launch_timeout_ms),
            release_timeout_ms: env_parse("RELEASE_TIMEOUT_MS").unwrap_or(default.release_timeout_ms),
            viewport_width: env_parse("VIEWPORT_WIDTH").unwrap_or(default.viewport_width),
            viewport_height: env_parse("VIEWPORT_HEIGHT").unwrap_or(default.viewport_height),
            device_scale_factor: env_parse("DEVICE_SCALE_FACTOR").unwrap_or(default.device_scale_factor),
            chrome_executable: std::env::var("CHROME_EXECUTABLE").ok().or(default.chrome_executable),
            blocked_url_patterns: std::env::var("BLOCKED_URL_PATTERNS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
                .unwrap_or(default.blocked_url_patterns),
            thresholds: PerformanceThresholds {
                target_ms: env_parse("PERF_TARGET_MS").unwrap_or(default.thresholds.target_ms),
                warning_ms: env_parse("PERF_WARNING_MS").unwrap_or(default.thresholds.warning_ms),
                critical_ms: env_parse("PERF_CRITICAL_MS").unwrap_or(default.thresholds.critical_ms),
                per_page_allowance_ms: env_parse("PERF_PER_PAGE_ALLOWANCE_MS").unwrap_or(default.thresholds.per_page_allowance_ms),
            },
            history_capacity: env_parse("PERF_HISTORY_CAPACITY").unwrap_or(default.history_capacity),
            pool_size: env_parse("SURFACE_POOL_SIZE").unwrap_or(default.pool_size),
            health_check_interval_ms: env_parse("HEALTH_CHECK_INTERVAL_MS").unwrap_or(default.health_check_interval_ms),
            page: PageOptions {
                format: env_parse("PAGE_FORMAT").unwrap_or(default.page.format),
                page_size: std::env::var("PAGE_SIZE").ok().or(default.page.page_size),
                ..default.page
            },
            verbose_logging: env_parse("VERBOSE_LOGGING").unwrap_or(default.verbose_logging),
        }
    }

    /// 从 TOML 文件加载，缺省字段使用默认值
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::TomlParseFailed {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_renders == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_concurrent_renders",
                reason: "必须大于 0".to_string(),
            });
        }
        if self.pool_size > self.max_concurrent_renders {
            return Err(ConfigError::InvalidValue {
                key: "pool_size",
                reason: format!("不能超过并发上限 {}", self.max_concurrent_renders),
            });
        }
        if !self.thresholds.is_ordered() {
            return Err(ConfigError::InvalidValue {
                key: "thresholds",
                reason: "必须满足 target < warning < critical".to_string(),
            });
        }
        if self.device_scale_factor <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "device_scale_factor",
                reason: "必须大于 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    pub fn content_load_timeout(&self) -> Duration {
        Duration::from_millis(self.content_load_timeout_ms)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }

    pub fn release_timeout(&self) -> Duration {
        Duration::from_millis(self.release_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::options::PageFormat;

    #[test]
    fn test_default_is_valid() {
        assert!(RenderConfig::default().validate().is_ok());
    }

    #[test]
    fn test_toml_partial_override() {
        let config: RenderConfig = toml::from_str(
            r#"
            max_concurrent_renders = 8
            pool_size = 2

            [thresholds]
            target_ms = 1000

            [page]
            format = "Letter"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_concurrent_renders, 8);
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.thresholds.target_ms, 1000);
        assert_eq!(config.thresholds.warning_ms, 5000);
        assert_eq!(config.page.format, PageFormat::Letter);
        assert!(!config.blocked_url_patterns.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = RenderConfig {
            max_concurrent_renders: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RenderConfig {
            max_concurrent_renders: 2,
            pool_size: 3,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
