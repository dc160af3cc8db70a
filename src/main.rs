use std::path::Path;

use anyhow::{bail, Context, Result};
use paged_report::utils::files;
use paged_report::utils::logging::{self, log_performance_summary, log_render_summary, log_startup};
use paged_report::{RenderConfig, RenderPipeline};

const USAGE: &str = "用法: paged_report <template.html> <data.json> <out.pdf> [config.toml]";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (template_path, data_path, output_path, config_path) = match args.as_slice() {
        [t, d, o] => (t, d, o, None),
        [t, d, o, c] => (t, d, o, Some(c)),
        _ => bail!("{}", USAGE),
    };

    // 加载配置
    let config = match config_path {
        Some(path) => RenderConfig::from_toml_file(path)?,
        None => {
            let config = RenderConfig::from_env();
            config.validate()?;
            config
        }
    };

    // 初始化日志
    logging::init(config.verbose_logging);
    log_startup(config.max_concurrent_renders, config.pool_size);

    let template = files::read_template(template_path).await?;
    let context = files::read_context(data_path)
        .await
        .with_context(|| format!("加载数据失败: {}", data_path))?;

    let page = config.page.clone();
    let pipeline = RenderPipeline::with_chromium(config);

    // Ctrl+C 取消渲染，渲染实例仍会被销毁
    let cancel = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let result = pipeline.render_until(&template, &context, &page, cancel).await;
    pipeline.shutdown().await;

    match &result.buffer {
        Some(buffer) if result.ok => {
            if let Some(parent) = Path::new(output_path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            tokio::fs::write(output_path, buffer)
                .await
                .with_context(|| format!("写入产物失败: {}", output_path))?;
            log_render_summary(&result, Some(output_path));
        }
        _ => log_render_summary(&result, None),
    }
    log_performance_summary(&pipeline.guard().summary(10));

    if !result.ok {
        bail!(
            "渲染失败: {}",
            result.error.unwrap_or_else(|| "未知错误".to_string())
        );
    }
    Ok(())
}
