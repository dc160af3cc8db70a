//! 宽松的标记解析器
//!
//! 不做校验，只把模板切成元素树：未闭合的元素在输入末尾闭合，
//! 找不到对应开始标签的结束标签按文本保留。

use super::context::decode_entities;
use super::filters::FilterSpec;
use super::node::{
    is_raw_text_element, is_void_element, Attribute, Directive, Element, Node, ATTR_FIELD,
    ATTR_FORMAT, ATTR_IF, ATTR_PAGEBREAK, ATTR_REPEAT, ATTR_TEXT,
};

/// 解析后的模板
#[derive(Debug, Clone)]
pub struct Template<'a> {
    source: &'a str,
    nodes: Vec<Node>,
}

impl<'a> Template<'a> {
    pub fn parse(source: &'a str) -> Self {
        let nodes = Parser::new(source).run();
        Self { source, nodes }
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// 模板中指令的总数
    pub fn directive_count(&self) -> usize {
        fn count(nodes: &[Node]) -> usize {
            nodes
                .iter()
                .map(|n| match n {
                    Node::Element(el) => el.directives.len() + count(&el.children),
                    Node::Text(_) => 0,
                })
                .sum()
        }
        count(&self.nodes)
    }
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    stack: Vec<Element>,
    root: Vec<Node>,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            stack: Vec::new(),
            root: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<Node> {
        let len = self.bytes.len();
        while self.pos < len {
            match self.src[self.pos..].find('<') {
                None => {
                    self.push_text(self.pos, len);
                    self.pos = len;
                }
                Some(offset) => {
                    let lt = self.pos + offset;
                    if lt > self.pos {
                        self.push_text(self.pos, lt);
                    }
                    self.pos = lt;
                    self.markup_at(lt);
                }
            }
        }

        while let Some(mut el) = self.stack.pop() {
            el.span.end = len;
            self.attach_element(el);
        }
        self.root
    }

    fn markup_at(&mut self, lt: usize) {
        let rest = &self.src[lt..];
        let len = self.bytes.len();

        if rest.starts_with("<!--") {
            let end = rest.find("-->").map(|i| lt + i + 3).unwrap_or(len);
            self.push_text(lt, end);
            self.pos = end;
            return;
        }
        if rest.starts_with("<!") || rest.starts_with("<?") {
            let end = rest.find('>').map(|i| lt + i + 1).unwrap_or(len);
            self.push_text(lt, end);
            self.pos = end;
            return;
        }
        if rest.starts_with("</") {
            self.close_tag(lt);
            return;
        }
        if self.bytes.get(lt + 1).is_some_and(u8::is_ascii_alphabetic) && self.open_tag(lt) {
            return;
        }

        self.push_text(lt, lt + 1);
        self.pos = lt + 1;
    }

    fn close_tag(&mut self, lt: usize) {
        let len = self.bytes.len();
        let name_end = self.scan_name(lt + 2);
        let name = self.src[lt + 2..name_end].to_ascii_lowercase();
        let end = self.src[name_end..]
            .find('>')
            .map(|i| name_end + i + 1)
            .unwrap_or(len);

        match self.stack.iter().rposition(|el| el.name == name) {
            Some(index) if !name.is_empty() => {
                // 中间未闭合的元素在这里隐式闭合
                while self.stack.len() > index + 1 {
                    if let Some(mut inner) = self.stack.pop() {
                        inner.span.end = lt;
                        self.attach_element(inner);
                    }
                }
                if let Some(mut el) = self.stack.pop() {
                    el.close_tag = Some(lt..end);
                    el.span.end = end;
                    self.attach_element(el);
                }
            }
            _ => self.push_text(lt, end),
        }
        self.pos = end;
    }

    /// 解析开始标签；标签没有结尾时返回 false，由调用方按文本处理
    fn open_tag(&mut self, lt: usize) -> bool {
        let len = self.bytes.len();
        let name_end = self.scan_name(lt + 1);
        let name = self.src[lt + 1..name_end].to_ascii_lowercase();

        let mut attributes = Vec::new();
        let mut self_closing = false;
        let mut p = name_end;
        let end = loop {
            while p < len && self.bytes[p].is_ascii_whitespace() {
                p += 1;
            }
            if p >= len {
                return false;
            }
            match self.bytes[p] {
                b'>' => break p + 1,
                b'/' if self.bytes.get(p + 1) == Some(&b'>') => {
                    self_closing = true;
                    break p + 2;
                }
                b'/' => {
                    p += 1;
                    continue;
                }
                _ => {}
            }

            let attr_start = p;
            while p < len {
                let b = self.bytes[p];
                if b.is_ascii_whitespace() || b == b'=' || b == b'>' {
                    break;
                }
                if b == b'/' && self.bytes.get(p + 1) == Some(&b'>') {
                    break;
                }
                p += 1;
            }
            if p == attr_start {
                p += 1;
                continue;
            }
            let attr_name = self.src[attr_start..p].to_ascii_lowercase();

            let mut q = p;
            while q < len && self.bytes[q].is_ascii_whitespace() {
                q += 1;
            }
            let mut value = None;
            if q < len && self.bytes[q] == b'=' {
                q += 1;
                while q < len && self.bytes[q].is_ascii_whitespace() {
                    q += 1;
                }
                if q < len && (self.bytes[q] == b'"' || self.bytes[q] == b'\'') {
                    let quote = self.bytes[q] as char;
                    let Some(close) = self.src[q + 1..].find(quote).map(|i| q + 1 + i) else {
                        return false;
                    };
                    value = Some(q + 1..close);
                    p = close + 1;
                } else {
                    let value_start = q;
                    while q < len && !self.bytes[q].is_ascii_whitespace() && self.bytes[q] != b'>' {
                        q += 1;
                    }
                    value = Some(value_start..q);
                    p = q;
                }
            }

            attributes.push(Attribute {
                name: attr_name,
                span: attr_start..p,
                value,
            });
        };

        let mut el = Element {
            name,
            attributes,
            directives: Vec::new(),
            open_tag: lt..end,
            close_tag: None,
            self_closing,
            children: Vec::new(),
            span: lt..end,
        };
        self.pos = end;

        if el.self_closing || is_void_element(&el.name) {
            self.attach_element(el);
        } else if is_raw_text_element(&el.name) {
            match self.find_raw_close(end, &el.name) {
                Some(close_start) => {
                    let close_end = self.src[close_start..]
                        .find('>')
                        .map(|i| close_start + i + 1)
                        .unwrap_or(len);
                    if close_start > end {
                        el.children.push(Node::Text(end..close_start));
                    }
                    el.close_tag = Some(close_start..close_end);
                    el.span.end = close_end;
                    self.pos = close_end;
                }
                None => {
                    if len > end {
                        el.children.push(Node::Text(end..len));
                    }
                    el.span.end = len;
                    self.pos = len;
                }
            }
            self.attach_element(el);
        } else {
            self.stack.push(el);
        }
        true
    }

    fn find_raw_close(&self, from: usize, name: &str) -> Option<usize> {
        let mut search = from;
        while let Some(offset) = self.src[search..].find("</") {
            let start = search + offset;
            let name_start = start + 2;
            let name_end = self.scan_name(name_start);
            if self.src[name_start..name_end].eq_ignore_ascii_case(name) {
                return Some(start);
            }
            search = name_start;
        }
        None
    }

    fn scan_name(&self, from: usize) -> usize {
        let mut p = from;
        while p < self.bytes.len() {
            let b = self.bytes[p];
            if b.is_ascii_alphanumeric() || b == b'-' || b == b':' || b == b'_' {
                p += 1;
            } else {
                break;
            }
        }
        p
    }

    fn push_text(&mut self, start: usize, end: usize) {
        if end > start {
            self.attach(Node::Text(start..end));
        }
    }

    fn attach_element(&mut self, mut el: Element) {
        el.directives = extract_directives(self.src, &el);
        self.attach(Node::Element(el));
    }

    fn attach(&mut self, node: Node) {
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => self.root.push(node),
        }
    }
}

fn extract_directives(src: &str, el: &Element) -> Vec<Directive> {
    let value_of = |name: &str| {
        el.attribute(name).map(|attr| {
            attr.value
                .clone()
                .map(|range| decode_entities(&src[range]).trim().to_string())
                .unwrap_or_default()
        })
    };

    let mut directives = Vec::new();
    if let Some(expression) = value_of(ATTR_IF) {
        directives.push(Directive::Conditional { expression });
    }
    if let Some(path) = value_of(ATTR_REPEAT) {
        directives.push(Directive::Repeat { path });
    }
    if let Some(path) = value_of(ATTR_FIELD) {
        let text: String = el
            .children
            .iter()
            .filter_map(|n| match n {
                Node::Text(range) => Some(&src[range.clone()]),
                Node::Element(_) => None,
            })
            .collect();
        directives.push(Directive::Field {
            path,
            filter: FilterSpec::find_in(&text),
        });
    }
    if let Some(call) = value_of(ATTR_FORMAT) {
        directives.push(Directive::Format { call });
    }
    if let Some(expression) = value_of(ATTR_TEXT) {
        directives.push(Directive::Text { expression });
    }
    if let Some(kind) = value_of(ATTR_PAGEBREAK) {
        directives.push(Directive::PageBreak { kind });
    }
    directives
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_element<'t>(template: &'t Template<'_>) -> &'t Element {
        template
            .nodes()
            .iter()
            .find_map(|n| match n {
                Node::Element(el) => Some(el),
                Node::Text(_) => None,
            })
            .unwrap()
    }

    #[test]
    fn test_parse_nested_elements() {
        let src = r#"<div class="a"><span data-field="site.name"></span>tail</div>"#;
        let template = Template::parse(src);
        let div = first_element(&template);
        assert_eq!(div.name, "div");
        assert_eq!(div.span, 0..src.len());
        assert_eq!(div.children.len(), 2);
        match &div.children[0] {
            Node::Element(span) => {
                assert_eq!(
                    span.directives,
                    vec![Directive::Field {
                        path: "site.name".to_string(),
                        filter: None
                    }]
                );
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_parse_void_and_self_closing() {
        let src = r#"<p>a<br>b<img src="x.png"/>c</p>"#;
        let template = Template::parse(src);
        let p = first_element(&template);
        assert_eq!(p.children.len(), 5);
        assert_eq!(p.close_tag, Some(src.len() - 4..src.len()));
    }

    #[test]
    fn test_unclosed_element_runs_to_end() {
        let src = "<div><p>open";
        let template = Template::parse(src);
        let div = first_element(&template);
        assert_eq!(div.span, 0..src.len());
        assert!(div.close_tag.is_none());
    }

    #[test]
    fn test_stray_end_tag_is_text() {
        let src = "a</span>b";
        let template = Template::parse(src);
        assert!(template.nodes().iter().all(|n| matches!(n, Node::Text(_))));
    }

    #[test]
    fn test_script_content_not_parsed() {
        let src = r#"<script>if (a < b) { x = "<div data-if='no'>"; }</script>"#;
        let template = Template::parse(src);
        let script = first_element(&template);
        assert_eq!(script.children.len(), 1);
        assert_eq!(template.directive_count(), 0);
    }

    #[test]
    fn test_directives_in_processing_order_and_decoded() {
        let src = r#"<tr data-pagebreak="avoid" data-field="x" data-repeat="rows" data-if="a &gt; 1"></tr>"#;
        let template = Template::parse(src);
        let tr = first_element(&template);
        let attrs: Vec<&str> = tr.directives.iter().map(Directive::attr).collect();
        assert_eq!(attrs, vec![ATTR_IF, ATTR_REPEAT, ATTR_FIELD, ATTR_PAGEBREAK]);
        assert_eq!(tr.conditional(), Some("a > 1"));
    }

    #[test]
    fn test_field_filter_token() {
        let src = r#"<span data-field="total">{{currency:$}}</span>"#;
        let template = Template::parse(src);
        let span = first_element(&template);
        match &span.directives[0] {
            Directive::Field { filter: Some(spec), .. } => {
                assert_eq!(spec.name, "currency");
                assert_eq!(spec.arg.as_deref(), Some("$"));
            }
            other => panic!("unexpected directive {:?}", other),
        }
    }

    #[test]
    fn test_unterminated_tag_is_text() {
        let src = r#"<div class="x"#;
        let template = Template::parse(src);
        assert!(template.nodes().iter().all(|n| matches!(n, Node::Text(_))));
    }
}
