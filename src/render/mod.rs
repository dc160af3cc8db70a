//! 渲染层：准入控制、页面选项、打印样式与渲染流水线

pub mod admission;
pub mod options;
pub mod pipeline;
pub mod result;
pub mod stylesheet;

pub use admission::{AdmissionController, AdmissionPermit, AdmissionSnapshot};
pub use options::{Margins, PageFormat, PageOptions, PdfSpec};
pub use pipeline::RenderPipeline;
pub use result::{LogEntry, LogLevel, RenderLog, RenderResult};
