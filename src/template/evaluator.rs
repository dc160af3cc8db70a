//! 指令求值器
//!
//! 先把模板解析成元素树，再按树求值。单个指令失败时，
//! 整个出错元素按源文本原样输出，其余部分继续处理。

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::condition;
use super::context::{escape_html, item_scope_value, BindingContext, Scope};
use super::filters;
use super::functions;
use super::node::{
    Directive, Element, Node, ATTR_FIELD, ATTR_FORMAT, ATTR_IF, ATTR_REPEAT, ATTR_TEXT,
};
use super::parser::Template;
use crate::error::DirectiveError;
use crate::utils::logging::truncate_text;

/// 诊断信息里保留的片段长度
const FRAGMENT_PREVIEW_CHARS: usize = 120;

/// 一次失败的指令求值
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    /// 出错的指令属性名
    pub directive: &'static str,
    /// 被原样保留的片段（截断）
    pub fragment: String,
    pub message: String,
    #[serde(skip)]
    pub error: DirectiveError,
}

/// 求值结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub markup: String,
    pub directive_count: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl Evaluation {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// 模板指令求值器
///
/// 除时间函数外结果是确定的；需要可重复输出时用 [`DirectiveEvaluator::with_fixed_time`]。
#[derive(Debug, Clone, Default)]
pub struct DirectiveEvaluator {
    fixed_time: Option<DateTime<Local>>,
}

impl DirectiveEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 固定 `now()` 的返回时间
    pub fn with_fixed_time(now: DateTime<Local>) -> Self {
        Self {
            fixed_time: Some(now),
        }
    }

    /// 求值模板，从不失败
    pub fn evaluate(&self, template: &str, context: &BindingContext) -> String {
        self.evaluate_with_diagnostics(template, context).markup
    }

    /// 求值模板，同时返回被吸收的指令错误
    pub fn evaluate_with_diagnostics(&self, template: &str, context: &BindingContext) -> Evaluation {
        let parsed = Template::parse(template);
        let mut walk = Walk {
            src: parsed.source(),
            now: self.fixed_time.unwrap_or_else(Local::now),
            out: String::with_capacity(template.len() + template.len() / 4),
            diagnostics: Vec::new(),
        };
        walk.nodes(parsed.nodes(), &Scope::root(context.value()));

        let directive_count = parsed.directive_count();
        debug!(
            "模板求值完成: {} 个指令, {} 个诊断",
            directive_count,
            walk.diagnostics.len()
        );
        Evaluation {
            markup: walk.out,
            directive_count,
            diagnostics: walk.diagnostics,
        }
    }
}

type Failure = (&'static str, DirectiveError);

struct Walk<'t> {
    src: &'t str,
    now: DateTime<Local>,
    out: String,
    diagnostics: Vec<Diagnostic>,
}

impl Walk<'_> {
    fn nodes(&mut self, nodes: &[Node], scope: &Scope<'_>) {
        for node in nodes {
            match node {
                Node::Text(range) => self.out.push_str(&self.src[range.clone()]),
                Node::Element(el) => self.element(el, scope),
            }
        }
    }

    fn element(&mut self, el: &Element, scope: &Scope<'_>) {
        let mark = self.out.len();
        if let Err((directive, error)) = self.try_element(el, scope) {
            self.out.truncate(mark);
            let fragment = &self.src[el.span.clone()];
            self.out.push_str(fragment);
            warn!("⚠️ 指令 {} 求值失败，保留原始片段: {}", directive, error);
            self.diagnostics.push(Diagnostic {
                directive,
                fragment: truncate_text(fragment, FRAGMENT_PREVIEW_CHARS),
                message: error.to_string(),
                error,
            });
        }
    }

    fn try_element(&mut self, el: &Element, scope: &Scope<'_>) -> Result<(), Failure> {
        if let Some(expression) = el.conditional() {
            let keep = condition::evaluate(expression, scope).map_err(|e| (ATTR_IF, e))?;
            if !keep {
                return Ok(());
            }
        }

        self.open_tag(el);
        if el.is_void() {
            return Ok(());
        }

        match el.content_directive() {
            Some(Directive::Repeat { path }) => self.repeat(el, path, scope)?,
            Some(Directive::Field { path, filter }) => {
                if path.is_empty() {
                    return Err(empty(ATTR_FIELD));
                }
                let value = scope.resolve(path);
                let text = filters::apply(filter.as_ref(), value.as_deref());
                self.out.push_str(&escape_html(&text));
            }
            Some(Directive::Format { call }) => {
                let text = functions::evaluate_call(call, scope, &self.now)
                    .map_err(|e| (ATTR_FORMAT, e))?;
                self.out.push_str(&escape_html(&text));
            }
            Some(Directive::Text { expression }) => {
                if expression.is_empty() {
                    return Err(empty(ATTR_TEXT));
                }
                let text = functions::evaluate_text(expression, scope, &self.now)
                    .map_err(|e| (ATTR_TEXT, e))?;
                self.out.push_str(&escape_html(&text));
            }
            _ => self.nodes(&el.children, scope),
        }

        if let Some(close) = &el.close_tag {
            self.out.push_str(&self.src[close.clone()]);
        }
        Ok(())
    }

    fn repeat(&mut self, el: &Element, path: &str, scope: &Scope<'_>) -> Result<(), Failure> {
        if path.is_empty() {
            return Err(empty(ATTR_REPEAT));
        }
        // 只支持单层重复：整个外层元素按原文保留一次
        if let Some(inner) = el.nested_repeat() {
            let error = DirectiveError::NestedRepeat {
                path: inner.to_string(),
            };
            return Err((ATTR_REPEAT, error));
        }
        let resolved = scope.resolve(path);
        let Some(Value::Array(items)) = resolved.as_deref() else {
            return Ok(());
        };
        for (index0, item) in items.iter().enumerate() {
            let item_value = item_scope_value(item, index0);
            let item_scope = scope.with_item(&item_value);
            self.nodes(&el.children, &item_scope);
        }
        Ok(())
    }

    /// 输出开始标签，分页指令合并到 style 属性
    fn open_tag(&mut self, el: &Element) {
        let open = el.open_tag.clone();
        let Some(css) = el.page_break().and_then(page_break_css) else {
            self.out.push_str(&self.src[open]);
            return;
        };

        match el.attribute("style") {
            Some(style) => {
                let src = self.src;
                let quoted = style.value.as_ref().filter(|v| {
                    v.start > 0 && matches!(src.as_bytes()[v.start - 1], b'"' | b'\'')
                });
                match quoted {
                    Some(value) => {
                        let existing = self.src[value.clone()].trim_end();
                        self.out.push_str(&self.src[open.start..value.start]);
                        self.out.push_str(&merge_style(existing, css));
                        self.out.push_str(&self.src[value.end..open.end]);
                    }
                    None => {
                        let existing = style
                            .value
                            .as_ref()
                            .map(|v| self.src[v.clone()].trim_end())
                            .unwrap_or_default();
                        self.out.push_str(&self.src[open.start..style.span.start]);
                        self.out.push_str(&format!("style=\"{}\"", merge_style(existing, css)));
                        self.out.push_str(&self.src[style.span.end..open.end]);
                    }
                }
            }
            None => {
                let tail = if el.self_closing { 2 } else { 1 };
                let insert_at = self.src[open.start..open.end - tail].trim_end().len() + open.start;
                self.out.push_str(&self.src[open.start..insert_at]);
                self.out.push_str(&format!(" style=\"{}\"", css));
                self.out.push_str(&self.src[insert_at..open.end]);
            }
        }
    }
}

fn empty(attr: &'static str) -> Failure {
    (attr, DirectiveError::EmptyExpression { attr })
}

/// 分页类型对应的 CSS；未知类型不处理
fn page_break_css(kind: &str) -> Option<&'static str> {
    match kind.to_ascii_lowercase().as_str() {
        "before" => Some("page-break-before: always; break-before: page;"),
        "after" => Some("page-break-after: always; break-after: page;"),
        "avoid" => Some("page-break-inside: avoid; break-inside: avoid;"),
        _ => None,
    }
}

fn merge_style(existing: &str, css: &str) -> String {
    if existing.is_empty() {
        css.to_string()
    } else if existing.ends_with(';') {
        format!("{} {}", existing, css)
    } else {
        format!("{}; {}", existing, css)
    }
}
