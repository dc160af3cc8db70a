//! 测试用的内存渲染实例

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use paged_report::browser::{RenderSurface, SurfaceLauncher, SurfaceSettings};
use paged_report::error::{CleanupWarning, RenderError, RenderStage};
use paged_report::render::PdfSpec;

pub const FAKE_PDF: &[u8] = b"%PDF-1.7\n%fake\n";

/// 渲染实例的行为开关
#[derive(Debug, Clone)]
pub struct Behavior {
    pub launch_fails: bool,
    pub load_hangs: bool,
    pub has_content: bool,
    pub pdf_fails: bool,
    pub pdf_empty: bool,
    pub close_fails: bool,
    pub close_hangs: bool,
    pub reset_fails: bool,
    pub pdf_delay: Duration,
    pub content_height: Option<f64>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            launch_fails: false,
            load_hangs: false,
            has_content: true,
            pdf_fails: false,
            pdf_empty: false,
            close_fails: false,
            close_hangs: false,
            reset_fails: false,
            pdf_delay: Duration::ZERO,
            content_height: Some(1200.0),
        }
    }
}

/// 所有实例共享的统计
#[derive(Debug, Default)]
pub struct Stats {
    pub launched: AtomicUsize,
    pub closed: AtomicUsize,
    pub resets: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub printing: AtomicUsize,
    pub max_printing: AtomicUsize,
    pub last_markup: Mutex<String>,
    pub last_stylesheet: Mutex<String>,
    pub blocked: Mutex<Vec<String>>,
    pub last_spec: Mutex<Option<PdfSpec>>,
    /// 置位后所有实例的健康检查都失败
    pub unhealthy: AtomicBool,
}

impl Stats {
    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_printing(&self) -> usize {
        self.max_printing.load(Ordering::SeqCst)
    }

    pub fn last_markup(&self) -> String {
        self.last_markup.lock().unwrap().clone()
    }

    pub fn last_stylesheet(&self) -> String {
        self.last_stylesheet.lock().unwrap().clone()
    }
}

pub struct FakeLauncher {
    pub behavior: Mutex<Behavior>,
    pub stats: Arc<Stats>,
}

impl FakeLauncher {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            stats: Arc::new(Stats::default()),
        })
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }
}

#[async_trait]
impl SurfaceLauncher for FakeLauncher {
    async fn launch(&self, _settings: &SurfaceSettings) -> Result<Box<dyn RenderSurface>, RenderError> {
        let behavior = self.behavior.lock().unwrap().clone();
        if behavior.launch_fails {
            return Err(RenderError::engine(RenderStage::Launch, "无法启动浏览器"));
        }
        self.stats.launched.fetch_add(1, Ordering::SeqCst);
        let active = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_active.fetch_max(active, Ordering::SeqCst);
        Ok(Box::new(FakeSurface {
            behavior,
            stats: self.stats.clone(),
        }))
    }
}

pub struct FakeSurface {
    behavior: Behavior,
    stats: Arc<Stats>,
}

#[async_trait]
impl RenderSurface for FakeSurface {
    async fn block_urls(&self, patterns: &[String]) -> Result<(), RenderError> {
        *self.stats.blocked.lock().unwrap() = patterns.to_vec();
        Ok(())
    }

    async fn load_markup(&self, markup: &str) -> Result<(), RenderError> {
        *self.stats.last_markup.lock().unwrap() = markup.to_string();
        if self.behavior.load_hangs {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn wait_until_ready(&self) -> Result<(), RenderError> {
        Ok(())
    }

    async fn has_content(&self) -> Result<bool, RenderError> {
        Ok(self.behavior.has_content)
    }

    async fn inject_stylesheet(&self, css: &str) -> Result<(), RenderError> {
        *self.stats.last_stylesheet.lock().unwrap() = css.to_string();
        Ok(())
    }

    async fn content_height(&self) -> Result<Option<f64>, RenderError> {
        Ok(self.behavior.content_height)
    }

    async fn print_pdf(&self, spec: &PdfSpec) -> Result<Vec<u8>, RenderError> {
        *self.stats.last_spec.lock().unwrap() = Some(*spec);
        let printing = self.stats.printing.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_printing.fetch_max(printing, Ordering::SeqCst);
        let _guard = CountGuard(&self.stats.printing);

        if !self.behavior.pdf_delay.is_zero() {
            tokio::time::sleep(self.behavior.pdf_delay).await;
        }
        if self.behavior.pdf_fails {
            return Err(RenderError::engine(RenderStage::Paginate, "打印失败"));
        }
        if self.behavior.pdf_empty {
            return Ok(Vec::new());
        }
        Ok(FAKE_PDF.to_vec())
    }

    async fn reset(&self) -> Result<(), RenderError> {
        self.stats.resets.fetch_add(1, Ordering::SeqCst);
        if self.behavior.reset_fails {
            return Err(RenderError::engine(RenderStage::Release, "重置失败"));
        }
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        !self.stats.unhealthy.load(Ordering::SeqCst)
    }

    async fn close(self: Box<Self>) -> Result<(), CleanupWarning> {
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        self.stats.active.fetch_sub(1, Ordering::SeqCst);
        if self.behavior.close_hangs {
            std::future::pending::<()>().await;
        }
        if self.behavior.close_fails {
            return Err(CleanupWarning::new("fake", "进程已退出"));
        }
        Ok(())
    }
}

/// 离开作用域时计数减一（包括 future 被丢弃）
struct CountGuard<'a>(&'a AtomicUsize);

impl Drop for CountGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
