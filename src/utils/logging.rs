/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::performance::PerformanceSummary;
use crate::render::RenderResult;

/// 初始化日志输出
///
/// 日志级别由 `RUST_LOG` 控制，未设置时为 `info`；`verbose` 为 true 时默认 `debug`。
/// 重复调用不会报错。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
///
/// # 参数
/// - `max_concurrent`: 最大并发渲染数
/// - `pool_size`: 渲染实例池大小
pub fn log_startup(max_concurrent: usize, pool_size: usize) {
    info!("{}", "=".repeat(60));
    info!(
        "🚀 程序启动 - 分页报表渲染 ({})",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("📊 最大并发渲染数: {}", max_concurrent);
    if pool_size == 0 {
        info!("🧹 渲染实例: 每次请求单独启动并销毁");
    } else {
        info!("🧰 渲染实例池大小: {}", pool_size);
    }
    info!("{}", "=".repeat(60));
}

/// 打印单次渲染结果
///
/// # 参数
/// - `result`: 渲染结果
/// - `output_path`: 产物路径，失败时为 None
pub fn log_render_summary(result: &RenderResult, output_path: Option<&str>) {
    let log = &result.render_log;
    info!("\n{}", "=".repeat(60));
    info!("📊 渲染结果 [{}]", log.request_id);
    info!("{}", "=".repeat(60));
    if result.ok {
        info!("✅ 成功: {} 字节, 约 {} 页", result.buffer_len(), result.estimated_pages);
    } else {
        info!(
            "❌ 失败: {}",
            result.error.as_deref().unwrap_or("未知错误")
        );
    }
    info!("⏱️ 耗时: {}ms", result.elapsed_ms);
    if let Some(classification) = &log.classification {
        info!("📈 性能: {} - {}", classification.level, classification.message);
    }
    if log.degraded {
        info!("⚠️ 内容加载超时，已按已有内容输出");
    }
    for diagnostic in &log.diagnostics {
        info!(
            "⚠️ 指令 {} 被跳过: {} ({})",
            diagnostic.directive,
            diagnostic.message,
            truncate_text(&diagnostic.fragment, 60)
        );
    }
    for warning in &log.cleanup_warnings {
        info!("🧹 {}", warning);
    }
    if let Some(path) = output_path {
        info!("\n产物已保存至: {}", path);
    }
    info!("{}", "=".repeat(60));
}

/// 打印性能汇总
pub fn log_performance_summary(summary: &PerformanceSummary) {
    info!("\n{}", "─".repeat(60));
    info!(
        "📈 最近 {} 次渲染: 平均 {:.0}ms, 最长 {}ms, 失败 {}",
        summary.count, summary.average_ms, summary.max_ms, summary.failures
    );
    for (level, count) in &summary.by_level {
        info!("   {}: {}", level, count);
    }
    info!("{}", "─".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("短文本", 10), "短文本");
        assert_eq!(truncate_text("一二三四五", 3), "一二三...");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(false);
        init(true);
    }
}
