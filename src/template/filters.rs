//! 字段过滤器
//!
//! `data-field` 元素文本里的 `{{name}}` / `{{name:arg}}` 指定过滤器，
//! 未知过滤器原样输出解析到的值。

use std::fmt::Write;
use std::sync::LazyLock;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use phf::phf_map;
use regex::Regex;
use serde_json::Value;

use super::context::{as_number, is_truthy, to_text};

/// 默认日期格式
pub const DEFAULT_DATE_PATTERN: &str = "%Y-%m-%d";
/// 默认日期时间格式
pub const DEFAULT_DATETIME_PATTERN: &str = "%Y-%m-%d %H:%M";
/// 数字格式化允许的最大小数位数
pub const MAX_DECIMALS: usize = 20;

static FILTER_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_-]*)\s*(?::\s*([^}]*?))?\s*\}\}")
        .expect("filter token pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Filter {
    Date,
    DateTime,
    Number,
    Currency,
    Percent,
    Boolean,
    Join,
    Upper,
    Lower,
}

static FILTERS: phf::Map<&'static str, Filter> = phf_map! {
    "date" => Filter::Date,
    "datetime" => Filter::DateTime,
    "number" => Filter::Number,
    "currency" => Filter::Currency,
    "percent" => Filter::Percent,
    "boolean" => Filter::Boolean,
    "bool" => Filter::Boolean,
    "yesno" => Filter::Boolean,
    "join" => Filter::Join,
    "upper" => Filter::Upper,
    "lower" => Filter::Lower,
};

/// 过滤器声明
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSpec {
    pub name: String,
    pub arg: Option<String>,
}

impl FilterSpec {
    /// 在元素文本中查找第一个过滤器标记
    pub fn find_in(text: &str) -> Option<Self> {
        let caps = FILTER_TOKEN.captures(text)?;
        Some(Self {
            name: caps[1].to_string(),
            arg: caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| !s.is_empty()),
        })
    }
}

/// 对解析到的值应用过滤器，返回未转义的文本
pub fn apply(spec: Option<&FilterSpec>, value: Option<&Value>) -> String {
    let raw = || value.map(to_text).unwrap_or_default();
    let Some(spec) = spec else {
        return raw();
    };
    let Some(filter) = FILTERS.get(spec.name.as_str()).copied() else {
        return raw();
    };
    let arg = spec.arg.as_deref();

    let formatted = match filter {
        Filter::Date => value.and_then(|v| format_date(v, arg.unwrap_or(DEFAULT_DATE_PATTERN))),
        Filter::DateTime => {
            value.and_then(|v| format_date(v, arg.unwrap_or(DEFAULT_DATETIME_PATTERN)))
        }
        Filter::Number => value.and_then(as_number).map(|n| {
            let decimals = arg
                .and_then(|a| a.parse().ok())
                .unwrap_or(if n.fract() == 0.0 { 0 } else { 2 });
            group_thousands(n, decimals.min(MAX_DECIMALS))
        }),
        Filter::Currency => value
            .and_then(as_number)
            .map(|n| format_currency(n, arg.unwrap_or(""))),
        Filter::Percent => value.and_then(as_number).map(|n| {
            let decimals = arg.and_then(|a| a.parse().ok()).unwrap_or(0);
            format!("{:.*}%", decimals.min(MAX_DECIMALS), n)
        }),
        Filter::Boolean => {
            let (yes, no) = arg.and_then(|a| a.split_once('/')).unwrap_or(("Yes", "No"));
            let text = if is_truthy(value) { yes } else { no };
            Some(text.to_string())
        }
        Filter::Join => match value {
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .map(to_text)
                    .collect::<Vec<_>>()
                    .join(arg.unwrap_or(", ")),
            ),
            _ => None,
        },
        Filter::Upper => value.map(|v| to_text(v).to_uppercase()),
        Filter::Lower => value.map(|v| to_text(v).to_lowercase()),
    };

    formatted.unwrap_or_else(raw)
}

/// 千分位分组，保留指定位数小数（最多 [`MAX_DECIMALS`] 位）
pub fn group_thousands(n: f64, decimals: usize) -> String {
    let fixed = format!("{:.*}", decimals.min(MAX_DECIMALS), n.abs());
    let negative = n < 0.0 && fixed.chars().any(|c| c.is_ascii_digit() && c != '0');
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.to_string())),
        None => (fixed.clone(), None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&grouped);
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(&frac);
    }
    out
}

pub fn format_currency(n: f64, symbol: &str) -> String {
    let grouped = group_thousands(n, 2);
    match grouped.strip_prefix('-') {
        Some(abs) => format!("-{}{}", symbol, abs),
        None => format!("{}{}", symbol, grouped),
    }
}

/// 把日期值格式化；值无法识别为日期时返回 None
pub fn format_date(value: &Value, pattern: &str) -> Option<String> {
    let datetime = parse_datetime(value)?;
    format_naive(&datetime, pattern)
}

pub(crate) fn format_naive(datetime: &NaiveDateTime, pattern: &str) -> Option<String> {
    let pattern = to_strftime(pattern);
    let items: Vec<Item<'_>> = StrftimeItems::new(&pattern).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return None;
    }
    let mut out = String::new();
    write!(out, "{}", datetime.format_with_items(items.into_iter())).ok()?;
    Some(out)
}

/// 识别 RFC 3339、常见日期串和毫秒时间戳
pub(crate) fn parse_datetime(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.naive_local());
            }
            for pattern in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
                if let Ok(dt) = NaiveDateTime::parse_from_str(s, pattern) {
                    return Some(dt);
                }
            }
            for pattern in ["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"] {
                if let Ok(date) = NaiveDate::parse_from_str(s, pattern) {
                    return date.and_hms_opt(0, 0, 0);
                }
            }
            None
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|dt| dt.naive_utc()),
        _ => None,
    }
}

/// `YYYY-MM-DD HH:mm:ss` 风格的模式转换为 strftime；已经是 strftime 的原样返回
fn to_strftime(pattern: &str) -> String {
    if pattern.contains('%') {
        return pattern.to_string();
    }
    const TOKENS: &[(&str, &str)] = &[
        ("YYYY", "%Y"),
        ("YY", "%y"),
        ("MM", "%m"),
        ("DD", "%d"),
        ("HH", "%H"),
        ("mm", "%M"),
        ("ss", "%S"),
    ];
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut rest = pattern;
    'outer: while !rest.is_empty() {
        for (token, replacement) in TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(replacement);
                rest = tail;
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(name: &str, arg: Option<&str>) -> FilterSpec {
        FilterSpec {
            name: name.to_string(),
            arg: arg.map(str::to_string),
        }
    }

    #[test]
    fn test_find_filter_token() {
        assert_eq!(FilterSpec::find_in("{{date}}"), Some(spec("date", None)));
        assert_eq!(
            FilterSpec::find_in("  {{ join : / }} "),
            Some(spec("join", Some("/")))
        );
        assert_eq!(FilterSpec::find_in("plain"), None);
    }

    #[test]
    fn test_unknown_filter_passes_raw_value() {
        let value = json!("raw");
        assert_eq!(apply(Some(&spec("sparkle", None)), Some(&value)), "raw");
    }

    #[test]
    fn test_date_filters() {
        let value = json!("2024-03-05T14:30:00+09:00");
        assert_eq!(apply(Some(&spec("date", None)), Some(&value)), "2024-03-05");
        assert_eq!(
            apply(Some(&spec("datetime", None)), Some(&value)),
            "2024-03-05 14:30"
        );
        assert_eq!(
            apply(Some(&spec("date", Some("DD/MM/YYYY"))), Some(&value)),
            "05/03/2024"
        );
        let not_a_date = json!("soon");
        assert_eq!(apply(Some(&spec("date", None)), Some(&not_a_date)), "soon");
    }

    #[test]
    fn test_number_and_currency() {
        assert_eq!(apply(Some(&spec("number", None)), Some(&json!(1234567))), "1,234,567");
        assert_eq!(apply(Some(&spec("number", None)), Some(&json!(1234.5))), "1,234.50");
        assert_eq!(
            apply(Some(&spec("currency", Some("$"))), Some(&json!(-9876.543))),
            "-$9,876.54"
        );
        assert_eq!(apply(Some(&spec("currency", None)), Some(&json!("12"))), "12.00");
        assert_eq!(apply(Some(&spec("percent", None)), Some(&json!(80))), "80%");
        assert_eq!(apply(Some(&spec("number", None)), Some(&json!("n/a"))), "n/a");
    }

    #[test]
    fn test_precision_is_capped() {
        let capped = "1.".to_string() + "5" + &"0".repeat(MAX_DECIMALS - 1);
        assert_eq!(apply(Some(&spec("number", Some("70000"))), Some(&json!(1.5))), capped);
        assert_eq!(apply(Some(&spec("number", Some("20000000"))), Some(&json!(1.5))), capped);
        let percent = apply(Some(&spec("percent", Some("70000"))), Some(&json!(1.5)));
        assert_eq!(percent, capped.clone() + "%");
    }

    #[test]
    fn test_group_thousands_edges() {
        assert_eq!(group_thousands(0.0, 0), "0");
        assert_eq!(group_thousands(999.0, 0), "999");
        assert_eq!(group_thousands(1000.0, 0), "1,000");
        assert_eq!(group_thousands(-0.001, 2), "0.00");
    }

    #[test]
    fn test_boolean_and_join() {
        assert_eq!(apply(Some(&spec("boolean", None)), Some(&json!(true))), "Yes");
        assert_eq!(apply(Some(&spec("yesno", Some("是/否"))), None), "否");
        assert_eq!(
            apply(Some(&spec("join", Some(" | "))), Some(&json!(["a", "b", 3]))),
            "a | b | 3"
        );
    }

    #[test]
    fn test_missing_value_is_empty() {
        assert_eq!(apply(None, None), "");
        assert_eq!(apply(Some(&spec("date", None)), None), "");
    }
}
