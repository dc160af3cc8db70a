//! 模板层
//!
//! 把带 `data-*` 指令的 HTML 模板和绑定数据合成为最终标记。

mod condition;
pub mod context;
pub mod evaluator;
pub mod filters;
mod functions;
pub mod node;
pub mod parser;

pub use context::BindingContext;
pub use evaluator::{Diagnostic, DirectiveEvaluator, Evaluation};
pub use filters::FilterSpec;
pub use node::{Directive, Element, Node};
pub use parser::Template;
