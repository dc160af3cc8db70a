//! 渲染实例的获取与归还
//!
//! - [`DisposableProvider`]：每次请求启动新实例，用完销毁
//! - [`SurfacePool`]：保留少量空闲实例，归还前清空文档，后台定期剔除不健康的实例

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::surface::{RenderSurface, SurfaceLauncher, SurfaceProvider, SurfaceSettings};
use crate::error::{CleanupWarning, RenderError};

/// 用完即销毁
pub struct DisposableProvider {
    launcher: Arc<dyn SurfaceLauncher>,
    settings: SurfaceSettings,
}

impl DisposableProvider {
    pub fn new(launcher: Arc<dyn SurfaceLauncher>, settings: SurfaceSettings) -> Self {
        Self { launcher, settings }
    }
}

#[async_trait]
impl SurfaceProvider for DisposableProvider {
    async fn acquire(&self) -> Result<Box<dyn RenderSurface>, RenderError> {
        self.launcher.launch(&self.settings).await
    }

    async fn release(&self, surface: Box<dyn RenderSurface>) -> Result<(), CleanupWarning> {
        surface.close().await
    }
}

/// 渲染实例池
pub struct SurfacePool {
    launcher: Arc<dyn SurfaceLauncher>,
    settings: SurfaceSettings,
    idle: Mutex<VecDeque<Box<dyn RenderSurface>>>,
    capacity: usize,
}

impl SurfacePool {
    /// `capacity` 为空闲实例上限，至少为 1
    pub fn new(launcher: Arc<dyn SurfaceLauncher>, settings: SurfaceSettings, capacity: usize) -> Self {
        Self {
            launcher,
            settings,
            idle: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }

    /// 检查全部空闲实例，销毁不健康的，返回销毁数量
    pub async fn check_health(&self) -> usize {
        let candidates: Vec<_> = self.idle.lock().await.drain(..).collect();
        let mut healthy = Vec::with_capacity(candidates.len());
        let mut evicted = 0;
        for surface in candidates {
            if surface.is_healthy().await {
                healthy.push(surface);
            } else {
                evicted += 1;
                discard(surface).await;
            }
        }

        let mut overflow = Vec::new();
        {
            let mut idle = self.idle.lock().await;
            for surface in healthy {
                if idle.len() < self.capacity {
                    idle.push_back(surface);
                } else {
                    overflow.push(surface);
                }
            }
        }
        for surface in overflow {
            discard(surface).await;
        }

        if evicted > 0 {
            info!("🩺 实例池健康检查: 移除 {} 个不健康实例", evicted);
        }
        evicted
    }

    /// 启动后台健康检查；实例池释放后任务自行退出
    pub fn spawn_health_checks(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let pool: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                pool.check_health().await;
                debug!("🩺 健康检查完成，空闲实例 {} 个", pool.idle_count().await);
            }
            debug!("实例池健康检查任务退出");
        })
    }
}

#[async_trait]
impl SurfaceProvider for SurfacePool {
    async fn acquire(&self) -> Result<Box<dyn RenderSurface>, RenderError> {
        loop {
            let candidate = self.idle.lock().await.pop_front();
            let Some(surface) = candidate else {
                break;
            };
            if surface.is_healthy().await {
                return Ok(surface);
            }
            debug!("丢弃不健康的空闲实例");
            discard(surface).await;
        }
        self.launcher.launch(&self.settings).await
    }

    async fn release(&self, surface: Box<dyn RenderSurface>) -> Result<(), CleanupWarning> {
        if let Err(e) = surface.reset().await {
            debug!("实例重置失败，直接销毁: {}", e);
            return surface.close().await;
        }
        let surface = {
            let mut idle = self.idle.lock().await;
            if idle.len() < self.capacity {
                idle.push_back(surface);
                return Ok(());
            }
            surface
        };
        surface.close().await
    }

    async fn shutdown(&self) {
        let drained: Vec<_> = self.idle.lock().await.drain(..).collect();
        let count = drained.len();
        for surface in drained {
            discard(surface).await;
        }
        debug!("实例池已关闭 {} 个空闲实例", count);
    }
}

async fn discard(surface: Box<dyn RenderSurface>) {
    if let Err(warning) = surface.close().await {
        warn!("⚠️ {}", warning);
    }
}
