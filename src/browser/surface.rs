//! 渲染实例抽象
//!
//! 流水线只通过这里的 trait 使用渲染实例，具体实现见 [`super::headless`]。
//! 测试里用内存实现替换。

use async_trait::async_trait;

use crate::config::RenderConfig;
use crate::error::{CleanupWarning, RenderError};
use crate::render::options::PdfSpec;

/// 启动渲染实例所需的参数
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceSettings {
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub device_scale_factor: f64,
    pub chrome_executable: Option<String>,
}

impl SurfaceSettings {
    pub fn from_config(config: &RenderConfig) -> Self {
        Self {
            viewport_width: config.viewport_width,
            viewport_height: config.viewport_height,
            device_scale_factor: config.device_scale_factor,
            chrome_executable: config.chrome_executable.clone(),
        }
    }
}

impl Default for SurfaceSettings {
    fn default() -> Self {
        Self::from_config(&RenderConfig::default())
    }
}

/// 一个无界面的渲染实例
///
/// 实例不跨请求共享状态：要么用完即销毁，要么归还实例池前调用 [`RenderSurface::reset`]。
#[async_trait]
pub trait RenderSurface: Send + Sync {
    /// 屏蔽匹配这些模式的外部请求
    async fn block_urls(&self, patterns: &[String]) -> Result<(), RenderError>;

    /// 载入标记（不等待资源就绪）
    async fn load_markup(&self, markup: &str) -> Result<(), RenderError>;

    /// 等待文档和字体就绪
    async fn wait_until_ready(&self) -> Result<(), RenderError>;

    /// 较弱的就绪信号：文档里已经有内容
    async fn has_content(&self) -> Result<bool, RenderError>;

    async fn inject_stylesheet(&self, css: &str) -> Result<(), RenderError>;

    /// 内容高度（CSS 像素），拿不到时为 None
    async fn content_height(&self) -> Result<Option<f64>, RenderError>;

    async fn print_pdf(&self, spec: &PdfSpec) -> Result<Vec<u8>, RenderError>;

    /// 清空文档，供实例池复用
    async fn reset(&self) -> Result<(), RenderError>;

    async fn is_healthy(&self) -> bool;

    /// 销毁实例
    async fn close(self: Box<Self>) -> Result<(), CleanupWarning>;
}

/// 启动新的渲染实例
#[async_trait]
pub trait SurfaceLauncher: Send + Sync {
    async fn launch(&self, settings: &SurfaceSettings) -> Result<Box<dyn RenderSurface>, RenderError>;
}

/// 流水线获取、归还渲染实例的入口
#[async_trait]
pub trait SurfaceProvider: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn RenderSurface>, RenderError>;

    /// 归还实例；失败只作为清理告警记录
    async fn release(&self, surface: Box<dyn RenderSurface>) -> Result<(), CleanupWarning>;

    /// 关闭提供者持有的全部实例
    async fn shutdown(&self) {}
}
