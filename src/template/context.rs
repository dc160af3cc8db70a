//! 绑定上下文与路径解析
//!
//! 上下文只读；任何一跳缺失或为 null 都解析为空，从不报错。

use std::borrow::Cow;

use serde_json::{Map, Value};

/// 只读的嵌套数据记录
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingContext {
    value: Value,
}

impl BindingContext {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// 解析点分路径
    pub fn resolve(&self, path: &str) -> Option<Cow<'_, Value>> {
        resolve_path(&self.value, path)
    }

    /// 路径对应的文本，缺失时为空字符串
    pub fn text(&self, path: &str) -> String {
        self.resolve(path).map(|v| to_text(&v)).unwrap_or_default()
    }
}

impl From<Value> for BindingContext {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

/// 求值作用域：根上下文，加上 data-repeat 的当前条目
#[derive(Debug, Clone, Copy)]
pub(crate) struct Scope<'a> {
    root: &'a Value,
    item: Option<&'a Value>,
}

impl<'a> Scope<'a> {
    pub(crate) fn root(root: &'a Value) -> Self {
        Self { root, item: None }
    }

    pub(crate) fn with_item<'b>(&self, item: &'b Value) -> Scope<'b>
    where
        'a: 'b,
    {
        Scope {
            root: self.root,
            item: Some(item),
        }
    }

    /// 先查条目作用域，首段不在条目里时回退到根上下文
    pub(crate) fn resolve(&self, path: &str) -> Option<Cow<'a, Value>> {
        if let Some(item) = self.item {
            let head = path.trim().split('.').next().unwrap_or_default().trim();
            if item.get(head).is_some() {
                return resolve_path(item, path);
            }
        }
        resolve_path(self.root, path)
    }

    pub(crate) fn text(&self, path: &str) -> String {
        self.resolve(path).map(|v| to_text(&v)).unwrap_or_default()
    }
}

/// 构造条目作用域：元素字段 + `index`（从 1 开始）+ `index0` + `this`
pub(crate) fn item_scope_value(item: &Value, index0: usize) -> Value {
    let mut map = match item {
        Value::Object(fields) => fields.clone(),
        _ => Map::new(),
    };
    map.insert("index".to_string(), Value::from(index0 + 1));
    map.insert("index0".to_string(), Value::from(index0));
    map.insert("this".to_string(), item.clone());
    Value::Object(map)
}

pub(crate) fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<Cow<'a, Value>> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }

    let mut current = Cow::Borrowed(root);
    for segment in path.split('.').map(str::trim) {
        if segment.is_empty() {
            return None;
        }
        current = match current {
            Cow::Borrowed(value) => step(value, segment)?,
            // 合成值（length）之后不能再往下走
            Cow::Owned(_) => return None,
        };
    }
    Some(current)
}

fn step<'a>(value: &'a Value, segment: &str) -> Option<Cow<'a, Value>> {
    match value {
        Value::Object(map) => map.get(segment).map(Cow::Borrowed),
        Value::Array(items) => {
            if segment == "length" {
                Some(Cow::Owned(Value::from(items.len())))
            } else {
                segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i))
                    .map(Cow::Borrowed)
            }
        }
        Value::String(s) if segment == "length" => Some(Cow::Owned(Value::from(s.chars().count()))),
        _ => None,
    }
}

/// 真值判断：null / false / 0 / 空字符串 / 空数组为假，其余已定义的值为真
pub(crate) fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(_)) => true,
    }
}

/// 值转文本：null 为空，整数不带小数点，数组用 ", " 连接
pub(crate) fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::Array(items) => items.iter().map(to_text).collect::<Vec<_>>().join(", "),
        Value::Object(_) => value.to_string(),
    }
}

/// 数值视图：数字本身，或可以解析为数字的字符串
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// 属性值里常见的实体
pub(crate) fn decode_entities(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }
    Cow::Owned(
        text.replace("&gt;", ">")
            .replace("&lt;", "<")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&#x27;", "'")
            .replace("&apos;", "'")
            .replace("&amp;", "&"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_nested_path() {
        let ctx = BindingContext::new(json!({"site": {"name": "Acme", "tags": ["a", "b"]}}));
        assert_eq!(ctx.text("site.name"), "Acme");
        assert_eq!(ctx.text("site.tags.1"), "b");
        assert_eq!(ctx.text("site.tags.length"), "2");
        assert_eq!(ctx.text("site.tags"), "a, b");
    }

    #[test]
    fn test_missing_paths_resolve_to_empty() {
        let ctx = BindingContext::new(json!({"a": {"b": null}, "n": 3}));
        for path in ["missing", "a.b", "a.b.c", "a.x.y", "n.deeper", "", "a..b", "a.b.length.x"] {
            assert_eq!(ctx.text(path), "", "path {:?}", path);
        }
    }

    #[test]
    fn test_item_scope_falls_back_to_root() {
        let root = json!({"currency": "EUR", "label": "root"});
        let item = item_scope_value(&json!({"label": "A"}), 0);
        let scope = Scope::root(&root);
        let item_scope = scope.with_item(&item);
        assert_eq!(item_scope.text("label"), "A");
        assert_eq!(item_scope.text("currency"), "EUR");
        assert_eq!(item_scope.text("index"), "1");
        assert_eq!(item_scope.text("index0"), "0");
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(None));
        assert!(!is_truthy(Some(&json!(null))));
        assert!(!is_truthy(Some(&json!(""))));
        assert!(!is_truthy(Some(&json!([]))));
        assert!(!is_truthy(Some(&json!(0))));
        assert!(is_truthy(Some(&json!("x"))));
        assert!(is_truthy(Some(&json!([1]))));
        assert!(is_truthy(Some(&json!({}))));
        assert!(is_truthy(Some(&json!(2.5))));
    }

    #[test]
    fn test_to_text_numbers() {
        assert_eq!(to_text(&json!(80)), "80");
        assert_eq!(to_text(&json!(80.0)), "80");
        assert_eq!(to_text(&json!(80.5)), "80.5");
        assert_eq!(to_text(&json!(true)), "true");
    }

    #[test]
    fn test_escape_and_decode() {
        assert_eq!(escape_html("<a & 'b'>"), "&lt;a &amp; &#39;b&#39;&gt;");
        assert_eq!(decode_entities("a &gt; 5 &amp;&amp; b"), "a > 5 && b");
    }
}
