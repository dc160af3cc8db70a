//! 渲染流水线
//!
//! 一次渲染依次经过：准入 → 求值 → 获取渲染实例 → 载入 → 样式 → 分页 → 分级 → 释放。
//! 只有渲染引擎错误、超时和取消会让结果为 `ok: false`；指令错误和清理失败都只记录。
//! 渲染实例和准入名额在每条路径上都只释放一次。

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use super::admission::{AdmissionController, AdmissionSnapshot};
use super::options::PageOptions;
use super::result::{LogLevel, RenderLog, RenderResult};
use super::stylesheet::print_stylesheet;
use crate::browser::{
    ChromiumLauncher, DisposableProvider, RenderSurface, SurfaceLauncher, SurfacePool,
    SurfaceProvider, SurfaceSettings,
};
use crate::config::RenderConfig;
use crate::error::{CleanupWarning, RenderError, RenderStage};
use crate::performance::PerformanceGuard;
use crate::template::{BindingContext, DirectiveEvaluator};

/// 无法测量内容高度时，按标记长度估算页数
const MARKUP_BYTES_PER_PAGE: usize = 6_000;

/// 打印缩放允许的范围
const MIN_PRINT_SCALE: f64 = 0.1;
const MAX_PRINT_SCALE: f64 = 2.0;

pub struct RenderPipeline {
    config: RenderConfig,
    admission: AdmissionController,
    provider: Arc<dyn SurfaceProvider>,
    guard: Arc<PerformanceGuard>,
    evaluator: DirectiveEvaluator,
    next_id: AtomicU64,
    health_task: Option<JoinHandle<()>>,
}

impl RenderPipeline {
    pub fn new(config: RenderConfig, provider: Arc<dyn SurfaceProvider>) -> Self {
        let guard = PerformanceGuard::new(config.thresholds, config.history_capacity);
        Self {
            admission: AdmissionController::new(config.max_concurrent_renders),
            provider,
            guard: Arc::new(guard),
            evaluator: DirectiveEvaluator::new(),
            next_id: AtomicU64::new(0),
            health_task: None,
            config,
        }
    }

    /// 按配置选择提供者：`pool_size` 为 0 时每次请求单独启动实例，否则使用实例池。
    ///
    /// 使用实例池时会启动后台健康检查，必须在 tokio 运行时内调用。
    pub fn with_launcher(config: RenderConfig, launcher: Arc<dyn SurfaceLauncher>) -> Self {
        let settings = SurfaceSettings::from_config(&config);
        if config.pool_size == 0 {
            let provider = Arc::new(DisposableProvider::new(launcher, settings));
            return Self::new(config, provider);
        }

        let pool = Arc::new(SurfacePool::new(launcher, settings, config.pool_size));
        let health_task = pool.spawn_health_checks(config.health_check_interval());
        info!(
            "🧰 渲染实例池已启用: 容量 {}, 健康检查间隔 {:?}",
            pool.capacity(),
            config.health_check_interval()
        );
        let mut pipeline = Self::new(config, pool);
        pipeline.health_task = Some(health_task);
        pipeline
    }

    /// 使用 Chromium 渲染实例
    pub fn with_chromium(config: RenderConfig) -> Self {
        Self::with_launcher(config, Arc::new(ChromiumLauncher))
    }

    /// 替换求值器（例如固定时间）
    pub fn with_evaluator(mut self, evaluator: DirectiveEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn admission(&self) -> AdmissionSnapshot {
        self.admission.snapshot()
    }

    pub fn guard(&self) -> &Arc<PerformanceGuard> {
        &self.guard
    }

    /// 渲染一份文档
    pub async fn render(
        &self,
        template: &str,
        context: &BindingContext,
        options: &PageOptions,
    ) -> RenderResult {
        self.render_until(template, context, options, std::future::pending::<()>())
            .await
    }

    /// 渲染一份文档，`cancel` 完成时提前结束
    ///
    /// 取消后仍会销毁渲染实例、归还准入名额，结果为 `ok: false`。
    pub async fn render_until<F>(
        &self,
        template: &str,
        context: &BindingContext,
        options: &PageOptions,
        cancel: F,
    ) -> RenderResult
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(cancel);
        let request_id = format!("render-{:06}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let started = Instant::now();
        let mut progress = Progress::new(&request_id, options.clone());

        // ① 准入
        debug!(
            "[渲染 {}] ⏳ 等待准入 (在途 {}/{})",
            request_id,
            self.admission.in_flight(),
            self.admission.ceiling()
        );
        let admitted = tokio::select! {
            biased;
            _ = &mut cancel => Err(RenderError::Cancelled),
            permit = self.admission.acquire() => permit,
        };
        let permit = match admitted {
            Ok(permit) => permit,
            Err(e) => {
                progress.fail(&e, self.admission.in_flight());
                warn!("[渲染 {}] ❌ 未获得准入: {}", request_id, e);
                return self.finish(progress, Err(e), started, false);
            }
        };
        let snapshot = self.admission.snapshot();
        progress.log.admission = Some(snapshot);
        progress.note(
            RenderStage::Admit,
            LogLevel::Info,
            format!("已获得准入 (在途 {}/{})", snapshot.in_flight, snapshot.ceiling),
            snapshot.in_flight,
        );
        info!(
            "[渲染 {}] 🚀 开始渲染 (在途 {}/{})",
            request_id, snapshot.in_flight, snapshot.ceiling
        );

        // ② 求值
        progress.stage = RenderStage::Evaluate;
        let evaluation = self.evaluator.evaluate_with_diagnostics(template, context);
        let level = if evaluation.is_clean() {
            LogLevel::Info
        } else {
            LogLevel::Warn
        };
        progress.note(
            RenderStage::Evaluate,
            level,
            format!(
                "模板求值完成: {} 个指令, {} 个被跳过",
                evaluation.directive_count,
                evaluation.diagnostics.len()
            ),
            snapshot.in_flight,
        );
        if !evaluation.is_clean() {
            warn!(
                "[渲染 {}] ⚠️ {} 个指令求值失败，已保留原始片段",
                request_id,
                evaluation.diagnostics.len()
            );
        }
        progress.log.diagnostics = evaluation.diagnostics;
        let markup = evaluation.markup;

        // ③ 获取渲染实例，端到端时限从这里开始计算
        let deadline = Instant::now() + self.config.render_timeout();
        progress.stage = RenderStage::Launch;
        let launch_deadline = deadline.min(Instant::now() + self.config.launch_timeout());
        let acquired = tokio::select! {
            biased;
            _ = &mut cancel => Err(RenderError::Cancelled),
            acquired = timeout_at(launch_deadline, self.provider.acquire()) => match acquired {
                Ok(result) => result,
                Err(_) => Err(RenderError::Timeout {
                    stage: RenderStage::Launch,
                    elapsed_ms: elapsed_ms(started),
                }),
            },
        };
        let lease = match acquired {
            Ok(surface) => SurfaceLease::new(surface, self.provider.clone(), &request_id),
            Err(e) => {
                error!("[渲染 {}] ❌ 渲染实例启动失败: {}", request_id, e);
                progress.fail(&e, self.admission.in_flight());
                let result = self.finish(progress, Err(e), started, true);
                drop(permit);
                return result;
            }
        };
        progress.note(
            RenderStage::Launch,
            LogLevel::Info,
            "渲染实例已就绪",
            self.admission.in_flight(),
        );

        // ④⑤⑥ 载入、样式、分页
        let driven = tokio::select! {
            biased;
            _ = &mut cancel => None,
            driven = timeout_at(deadline, self.drive(&lease, &markup, options, &mut progress)) => Some(driven),
        };
        let outcome = match driven {
            None => Err(RenderError::Cancelled),
            Some(Ok(result)) => result,
            Some(Err(_)) => Err(RenderError::Timeout {
                stage: progress.stage,
                elapsed_ms: elapsed_ms(started),
            }),
        };
        if let Err(e) = &outcome {
            error!("[渲染 {}] ❌ 渲染失败: {}", request_id, e);
            progress.fail(e, self.admission.in_flight());
        }

        // ⑦ 分级 ⑧ 释放
        let result = self.finish(progress, outcome, started, true);
        let result = self.release(lease, result).await;
        drop(permit);
        result
    }

    async fn drive(
        &self,
        lease: &SurfaceLease,
        markup: &str,
        options: &PageOptions,
        progress: &mut Progress,
    ) -> Result<Vec<u8>, RenderError> {
        let surface = lease.surface()?;
        let in_flight = self.admission.in_flight();

        progress.stage = RenderStage::Load;
        surface.block_urls(&self.config.blocked_url_patterns).await?;
        let load = async {
            surface.load_markup(markup).await?;
            surface.wait_until_ready().await
        };
        match timeout(self.config.content_load_timeout(), load).await {
            Ok(Ok(())) => progress.note(RenderStage::Load, LogLevel::Info, "内容加载完成", in_flight),
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                // 超时降级：检查是否已有内容，不让请求失败
                let present = surface.has_content().await?;
                progress.log.degraded = true;
                let message = if present {
                    format!(
                        "内容加载超过 {}ms，按已有内容继续",
                        self.config.content_load_timeout_ms
                    )
                } else {
                    format!(
                        "内容加载超过 {}ms，且未检测到内容，仍继续输出",
                        self.config.content_load_timeout_ms
                    )
                };
                warn!("[渲染 {}] ⚠️ {}", progress.log.request_id, message);
                progress.note(RenderStage::Load, LogLevel::Warn, message, in_flight);
            }
        }

        progress.stage = RenderStage::Style;
        surface.inject_stylesheet(&print_stylesheet(options)).await?;
        progress.note(RenderStage::Style, LogLevel::Info, "已应用打印样式", in_flight);

        progress.stage = RenderStage::Paginate;
        let scale = self
            .config
            .device_scale_factor
            .clamp(MIN_PRINT_SCALE, MAX_PRINT_SCALE);
        let spec = options.pdf_spec(scale);
        progress.estimated_pages = match surface.content_height().await? {
            Some(height) => spec.estimate_pages(height),
            None => estimate_pages_from_markup(markup),
        };
        let buffer = surface.print_pdf(&spec).await?;
        if buffer.is_empty() {
            return Err(RenderError::engine(RenderStage::Paginate, "渲染引擎返回了空文档"));
        }
        progress.note(
            RenderStage::Paginate,
            LogLevel::Info,
            format!(
                "已生成 {} 字节，约 {} 页",
                buffer.len(),
                progress.estimated_pages
            ),
            in_flight,
        );
        Ok(buffer)
    }

    /// 分级并组装结果；`classify` 为 false 时不写性能历史
    fn finish(
        &self,
        mut progress: Progress,
        outcome: Result<Vec<u8>, RenderError>,
        started: Instant,
        classify: bool,
    ) -> RenderResult {
        let elapsed_ms = elapsed_ms(started);
        let ok = outcome.is_ok();
        let estimated_pages = if ok { progress.estimated_pages } else { 0 };

        let performance_level = if classify {
            let classification = self.guard.classify_and_record(
                &progress.log.request_id,
                elapsed_ms,
                estimated_pages,
                ok,
            );
            progress.note(
                RenderStage::Classify,
                LogLevel::Info,
                classification.message.clone(),
                self.admission.in_flight(),
            );
            let level = classification.level;
            progress.log.classification = Some(classification);
            Some(level)
        } else {
            None
        };

        let (buffer, error) = match outcome {
            Ok(buffer) => (Some(buffer), None),
            Err(e) => (None, Some(e.to_string())),
        };
        RenderResult {
            ok,
            buffer,
            error,
            elapsed_ms,
            estimated_pages,
            performance_level,
            render_log: progress.log,
        }
    }

    /// 归还渲染实例；清理失败只记录，不改变结果
    ///
    /// 清理在独立任务中进行，超过 `release_timeout_ms` 就不再等待，
    /// 调用方随后归还准入名额，挂起的实例不会一直占用名额。
    async fn release(&self, lease: SurfaceLease, mut result: RenderResult) -> RenderResult {
        let request_id = result.render_log.request_id.clone();
        let in_flight = self.admission.in_flight();
        let cleanup = tokio::spawn(lease.release());
        let released = match timeout(self.config.release_timeout(), cleanup).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => Err(CleanupWarning::new("surface", e)),
            Err(_) => Err(CleanupWarning::new(
                "surface",
                format!(
                    "释放超过 {}ms 仍未完成，转入后台继续",
                    self.config.release_timeout_ms
                ),
            )),
        };
        match released {
            Ok(()) => {
                debug!("[渲染 {}] 渲染实例已释放", request_id);
                result
                    .render_log
                    .push(RenderStage::Release, LogLevel::Info, "渲染实例已释放", in_flight);
            }
            Err(warning) => {
                warn!("[渲染 {}] ⚠️ {}", request_id, warning);
                result.render_log.push(
                    RenderStage::Release,
                    LogLevel::Warn,
                    warning.to_string(),
                    in_flight,
                );
                result.render_log.cleanup_warnings.push(warning.to_string());
            }
        }

        if result.ok {
            info!(
                "[渲染 {}] ✅ 完成: {}ms, 约 {} 页, {}",
                request_id,
                result.elapsed_ms,
                result.estimated_pages,
                result
                    .performance_level
                    .map(|l| l.to_string())
                    .unwrap_or_default()
            );
        }
        result
    }

    /// 关闭实例池中的空闲实例并停止健康检查
    pub async fn shutdown(&self) {
        if let Some(task) = &self.health_task {
            task.abort();
        }
        self.provider.shutdown().await;
    }
}

impl Drop for RenderPipeline {
    fn drop(&mut self) {
        if let Some(task) = self.health_task.take() {
            task.abort();
        }
    }
}

/// 单次渲染过程中的状态
struct Progress {
    log: RenderLog,
    stage: RenderStage,
    estimated_pages: u32,
}

impl Progress {
    fn new(request_id: &str, options: PageOptions) -> Self {
        Self {
            log: RenderLog::new(request_id, options),
            stage: RenderStage::Admit,
            estimated_pages: 0,
        }
    }

    fn note(&mut self, stage: RenderStage, level: LogLevel, message: impl Into<String>, in_flight: usize) {
        self.log.push(stage, level, message, in_flight);
    }

    fn fail(&mut self, error: &RenderError, in_flight: usize) {
        let stage = error.stage().unwrap_or(self.stage);
        self.log.push(stage, LogLevel::Error, error.to_string(), in_flight);
    }
}

/// 借出的渲染实例
///
/// 正常路径通过 [`SurfaceLease::release`] 归还；如果整个渲染 future 被丢弃，
/// 在 drop 时转交后台任务归还。
struct SurfaceLease {
    surface: Option<Box<dyn RenderSurface>>,
    provider: Arc<dyn SurfaceProvider>,
    request_id: String,
}

impl SurfaceLease {
    fn new(surface: Box<dyn RenderSurface>, provider: Arc<dyn SurfaceProvider>, request_id: &str) -> Self {
        Self {
            surface: Some(surface),
            provider,
            request_id: request_id.to_string(),
        }
    }

    fn surface(&self) -> Result<&dyn RenderSurface, RenderError> {
        self.surface
            .as_deref()
            .ok_or_else(|| RenderError::engine(RenderStage::Release, "渲染实例已释放"))
    }

    async fn release(mut self) -> Result<(), CleanupWarning> {
        match self.surface.take() {
            Some(surface) => self.provider.release(surface).await,
            None => Ok(()),
        }
    }
}

impl Drop for SurfaceLease {
    fn drop(&mut self) {
        let Some(surface) = self.surface.take() else {
            return;
        };
        let provider = self.provider.clone();
        let request_id = std::mem::take(&mut self.request_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("[渲染 {}] 渲染被中断，后台释放渲染实例", request_id);
                handle.spawn(async move {
                    if let Err(warning) = provider.release(surface).await {
                        warn!("[渲染 {}] ⚠️ {}", request_id, warning);
                    }
                });
            }
            Err(_) => warn!("[渲染 {}] ⚠️ 运行时已关闭，无法释放渲染实例", request_id),
        }
    }
}

/// 按标记长度和强制分页数粗略估算页数
pub fn estimate_pages_from_markup(markup: &str) -> u32 {
    let by_size = markup.len().div_ceil(MARKUP_BYTES_PER_PAGE).max(1);
    let forced = markup.matches("break-before: page").count() + markup.matches("break-after: page").count();
    u32::try_from(by_size + forced).unwrap_or(u32::MAX)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markup_estimate() {
        assert_eq!(estimate_pages_from_markup(""), 1);
        assert_eq!(estimate_pages_from_markup(&"x".repeat(MARKUP_BYTES_PER_PAGE + 1)), 2);
        let with_breaks = r#"<div style="page-break-before: always; break-before: page;"></div><div style="page-break-after: always; break-after: page;"></div>"#;
        assert_eq!(estimate_pages_from_markup(with_breaks), 3);
    }
}
