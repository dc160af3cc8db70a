//! 基于 Chromium 的渲染实例
//!
//! 每个实例独占一个无头浏览器进程和一个页面，是页面资源的唯一持有者。

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{EnableParams, SetBlockedUrLsParams};
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::surface::{RenderSurface, SurfaceLauncher, SurfaceSettings};
use crate::error::{CleanupWarning, RenderError, RenderStage};
use crate::render::options::PdfSpec;

/// 等待文档与字体就绪
const READY_SCRIPT: &str = r#"
(async () => {
    if (document.readyState !== 'complete') {
        await new Promise((resolve) => window.addEventListener('load', resolve, { once: true }));
    }
    if (document.fonts && document.fonts.ready) {
        await document.fonts.ready;
    }
    return true;
})()
"#;

const HAS_CONTENT_SCRIPT: &str =
    "!!(document.body && (document.body.innerHTML.trim().length > 0 || document.body.childElementCount > 0))";

const HEIGHT_SCRIPT: &str = "Math.max(document.body ? document.body.scrollHeight : 0, document.documentElement ? document.documentElement.scrollHeight : 0)";

const RESET_SCRIPT: &str = "document.open(); document.write('<!DOCTYPE html><html><head></head><body></body></html>'); document.close(); true";

/// 关闭后等待浏览器进程退出的时限
const PROCESS_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// 启动 Chromium 渲染实例
#[derive(Debug, Clone, Default)]
pub struct ChromiumLauncher;

#[async_trait]
impl SurfaceLauncher for ChromiumLauncher {
    async fn launch(&self, settings: &SurfaceSettings) -> Result<Box<dyn RenderSurface>, RenderError> {
        let surface = ChromiumSurface::launch(settings).await?;
        Ok(Box::new(surface))
    }
}

/// 一个无头浏览器进程加一个页面
pub struct ChromiumSurface {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
}

impl ChromiumSurface {
    pub async fn launch(settings: &SurfaceSettings) -> Result<Self, RenderError> {
        debug!(
            "🚀 启动无头浏览器 ({}x{} @{})",
            settings.viewport_width, settings.viewport_height, settings.device_scale_factor
        );

        let mut builder = BrowserConfig::builder()
            .new_headless_mode()
            .window_size(settings.viewport_width, settings.viewport_height)
            .viewport(Viewport {
                width: settings.viewport_width,
                height: settings.viewport_height,
                device_scale_factor: Some(settings.device_scale_factor),
                emulating_mobile: false,
                is_landscape: false,
                has_touch: false,
            })
            .args(vec![
                "--disable-gpu",
                "--no-sandbox",
                "--disable-dev-shm-usage",
                "--font-render-hinting=none",
                "--remote-debugging-port=0",
            ]);
        if let Some(executable) = settings.chrome_executable.as_deref() {
            builder = builder.chrome_executable(Path::new(executable));
        }
        let config = builder.build().map_err(|e| {
            error!("配置无头浏览器失败: {}", e);
            RenderError::engine(RenderStage::Launch, format!("配置无头浏览器失败: {}", e))
        })?;

        let (mut browser, mut handler) = Browser::launch(config).await.map_err(|e| {
            error!("启动无头浏览器失败: {}", e);
            RenderError::engine(RenderStage::Launch, format!("启动无头浏览器失败: {}", e))
        })?;

        // 在后台处理浏览器事件
        let handler_task = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        let created = browser.new_page("about:blank").await;
        let page = match created {
            Ok(page) => page,
            Err(e) => {
                error!("创建页面失败: {}", e);
                if let Some(warning) = shutdown_browser(&mut browser).await {
                    warn!("⚠️ {}", warning);
                }
                handler_task.abort();
                return Err(RenderError::engine(
                    RenderStage::Launch,
                    format!("创建页面失败: {}", e),
                ));
            }
        };

        info!("✅ 无头浏览器已就绪");
        Ok(Self {
            browser,
            page,
            handler_task,
        })
    }

    async fn eval_as<T: DeserializeOwned>(&self, stage: RenderStage, js: &str) -> Result<T, RenderError> {
        let result = self
            .page
            .evaluate(js)
            .await
            .map_err(|e| RenderError::engine(stage, e))?;
        result
            .into_value::<T>()
            .map_err(|e| RenderError::engine(stage, e))
    }
}

#[async_trait]
impl RenderSurface for ChromiumSurface {
    async fn block_urls(&self, patterns: &[String]) -> Result<(), RenderError> {
        if patterns.is_empty() {
            return Ok(());
        }
        self.page
            .execute(EnableParams::default())
            .await
            .map_err(|e| RenderError::engine(RenderStage::Load, e))?;
        self.page
            .execute(SetBlockedUrLsParams::new(patterns.to_vec()))
            .await
            .map_err(|e| RenderError::engine(RenderStage::Load, e))?;
        debug!("已屏蔽 {} 个 URL 模式", patterns.len());
        Ok(())
    }

    async fn load_markup(&self, markup: &str) -> Result<(), RenderError> {
        self.page
            .set_content(markup)
            .await
            .map_err(|e| RenderError::engine(RenderStage::Load, e))?;
        Ok(())
    }

    async fn wait_until_ready(&self) -> Result<(), RenderError> {
        self.eval_as::<bool>(RenderStage::Load, READY_SCRIPT).await?;
        Ok(())
    }

    async fn has_content(&self) -> Result<bool, RenderError> {
        self.eval_as(RenderStage::Load, HAS_CONTENT_SCRIPT).await
    }

    async fn inject_stylesheet(&self, css: &str) -> Result<(), RenderError> {
        let literal = serde_json::to_string(css).map_err(|e| RenderError::engine(RenderStage::Style, e))?;
        let js = format!(
            "(() => {{ const style = document.createElement('style'); style.setAttribute('data-print-stylesheet', ''); style.textContent = {}; (document.head || document.documentElement).appendChild(style); return true; }})()",
            literal
        );
        self.eval_as::<bool>(RenderStage::Style, &js).await?;
        Ok(())
    }

    async fn content_height(&self) -> Result<Option<f64>, RenderError> {
        let height: f64 = self.eval_as(RenderStage::Paginate, HEIGHT_SCRIPT).await?;
        Ok((height.is_finite() && height > 0.0).then_some(height))
    }

    async fn print_pdf(&self, spec: &PdfSpec) -> Result<Vec<u8>, RenderError> {
        let params = PrintToPdfParams {
            print_background: Some(spec.print_background),
            scale: Some(spec.scale),
            paper_width: Some(spec.paper_width_in),
            paper_height: Some(spec.paper_height_in),
            margin_top: Some(spec.margin_top_in),
            margin_right: Some(spec.margin_right_in),
            margin_bottom: Some(spec.margin_bottom_in),
            margin_left: Some(spec.margin_left_in),
            prefer_css_page_size: Some(false),
            ..Default::default()
        };
        self.page
            .pdf(params)
            .await
            .map_err(|e| RenderError::engine(RenderStage::Paginate, e))
    }

    async fn reset(&self) -> Result<(), RenderError> {
        self.eval_as::<bool>(RenderStage::Release, RESET_SCRIPT).await?;
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        !self.handler_task.is_finished() && self.browser.version().await.is_ok()
    }

    async fn close(self: Box<Self>) -> Result<(), CleanupWarning> {
        let Self {
            mut browser,
            page,
            handler_task,
        } = *self;

        if let Err(e) = page.close().await {
            debug!("关闭页面失败: {}", e);
        }
        let failure = shutdown_browser(&mut browser).await;
        handler_task.abort();

        match failure {
            Some(warning) => Err(warning),
            None => {
                debug!("无头浏览器已关闭");
                Ok(())
            }
        }
    }
}

/// 关闭浏览器进程；正常关闭失败或进程迟迟不退出时强制结束，不等待一个仍在运行的进程
async fn shutdown_browser(browser: &mut Browser) -> Option<CleanupWarning> {
    let warning = match browser.close().await {
        Ok(_) => match timeout(PROCESS_EXIT_TIMEOUT, browser.wait()).await {
            Ok(Ok(_)) => return None,
            Ok(Err(e)) => CleanupWarning::new("chromium", e),
            Err(_) => CleanupWarning::new(
                "chromium",
                format!("进程在 {:?} 内未退出，已强制结束", PROCESS_EXIT_TIMEOUT),
            ),
        },
        Err(e) => CleanupWarning::new("chromium", e),
    };
    if let Some(Err(e)) = browser.kill().await {
        warn!("⚠️ 强制结束浏览器进程失败: {}", e);
    }
    Some(warning)
}
