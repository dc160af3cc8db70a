//! # Paged Report
//!
//! 把带 `data-*` 指令的 HTML 模板和 JSON 数据渲染成分页 PDF
//!
//! ## 架构设计
//!
//! 本系统分为四层：
//!
//! ### ① 模板层（Template）
//! - `template/` - 把模板解析成元素树，按绑定数据求值
//! - `DirectiveEvaluator` - 单个指令失败时原样保留该片段，从不中断整份文档
//!
//! ### ② 渲染实例层（Browser）
//! - `browser/` - 持有稀缺资源（无头浏览器），只暴露载入、加样式、打印的能力
//! - `DisposableProvider` / `SurfacePool` - 用完即销毁，或池化复用
//!
//! ### ③ 流水线层（Render）
//! - `render/pipeline` - 准入 → 求值 → 载入 → 样式 → 分页 → 分级 → 释放
//! - `AdmissionController` - 全进程并发上限，名额在每条路径上只归还一次
//!
//! ### ④ 性能层（Performance）
//! - `performance/` - 按阈值给耗时分级，保留有界的渲染历史
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod performance;
pub mod render;
pub mod template;
pub mod utils;

// 重新导出常用类型
pub use browser::{ChromiumLauncher, RenderSurface, SurfaceLauncher, SurfaceProvider};
pub use config::RenderConfig;
pub use error::{AppError, AppResult, CleanupWarning, DirectiveError, RenderError, RenderStage};
pub use performance::{PerformanceGuard, PerformanceLevel, PerformanceThresholds};
pub use render::{PageFormat, PageOptions, RenderPipeline, RenderResult};
pub use template::{BindingContext, DirectiveEvaluator, Evaluation};
