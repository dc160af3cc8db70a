//! 模板语法树
//!
//! 节点只记录源文本中的区间，求值时按区间原样复制未改动的部分，
//! 失败的片段也能逐字节还原。

use std::ops::Range;

use super::filters::FilterSpec;

/// 指令属性名
pub const ATTR_IF: &str = "data-if";
pub const ATTR_REPEAT: &str = "data-repeat";
pub const ATTR_FIELD: &str = "data-field";
pub const ATTR_FORMAT: &str = "data-format";
pub const ATTR_TEXT: &str = "data-text";
pub const ATTR_PAGEBREAK: &str = "data-pagebreak";

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// 文本、注释、doctype 等原样输出的内容
    Text(Range<usize>),
    Element(Element),
}

/// 一条模板指令（属性值已做实体解码）
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Conditional { expression: String },
    Repeat { path: String },
    Field { path: String, filter: Option<FilterSpec> },
    Format { call: String },
    Text { expression: String },
    PageBreak { kind: String },
}

impl Directive {
    /// 对应的属性名，用于诊断信息
    pub fn attr(&self) -> &'static str {
        match self {
            Directive::Conditional { .. } => ATTR_IF,
            Directive::Repeat { .. } => ATTR_REPEAT,
            Directive::Field { .. } => ATTR_FIELD,
            Directive::Format { .. } => ATTR_FORMAT,
            Directive::Text { .. } => ATTR_TEXT,
            Directive::PageBreak { .. } => ATTR_PAGEBREAK,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// 小写属性名
    pub name: String,
    /// 整个属性在源文本中的区间
    pub span: Range<usize>,
    /// 属性值（不含引号）的区间
    pub value: Option<Range<usize>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// 小写标签名
    pub name: String,
    pub attributes: Vec<Attribute>,
    /// 按求值顺序排列：条件、重复、字段、格式化、文本、分页
    pub directives: Vec<Directive>,
    pub open_tag: Range<usize>,
    pub close_tag: Option<Range<usize>>,
    pub self_closing: bool,
    pub children: Vec<Node>,
    /// 整个元素（含子节点与结束标签）的区间
    pub span: Range<usize>,
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn has_directives(&self) -> bool {
        !self.directives.is_empty()
    }

    /// 不能承载内容的元素
    pub fn is_void(&self) -> bool {
        self.self_closing || is_void_element(&self.name)
    }

    pub fn conditional(&self) -> Option<&str> {
        self.directives.iter().find_map(|d| match d {
            Directive::Conditional { expression } => Some(expression.as_str()),
            _ => None,
        })
    }

    pub fn repeat(&self) -> Option<&str> {
        self.directives.iter().find_map(|d| match d {
            Directive::Repeat { path } => Some(path.as_str()),
            _ => None,
        })
    }

    /// 子孙元素中第一个 `data-repeat` 的路径
    pub fn nested_repeat(&self) -> Option<&str> {
        self.children.iter().find_map(|node| match node {
            Node::Element(child) => child.repeat().or_else(|| child.nested_repeat()),
            Node::Text(_) => None,
        })
    }

    pub fn page_break(&self) -> Option<&str> {
        self.directives.iter().find_map(|d| match d {
            Directive::PageBreak { kind } => Some(kind.as_str()),
            _ => None,
        })
    }

    /// 决定元素内容的指令：重复 > 字段 > 格式化 > 文本
    pub fn content_directive(&self) -> Option<&Directive> {
        let rank = |d: &Directive| match d {
            Directive::Repeat { .. } => Some(0),
            Directive::Field { .. } => Some(1),
            Directive::Format { .. } => Some(2),
            Directive::Text { .. } => Some(3),
            _ => None,
        };
        self.directives
            .iter()
            .filter_map(|d| rank(d).map(|r| (r, d)))
            .min_by_key(|(r, _)| *r)
            .map(|(_, d)| d)
    }
}

pub fn is_void_element(name: &str) -> bool {
    matches!(
        name,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

/// 内容按原始文本处理、不再解析标签的元素
pub fn is_raw_text_element(name: &str) -> bool {
    matches!(name, "script" | "style" | "textarea" | "title")
}
