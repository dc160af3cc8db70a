//! `data-format` / `data-text` 的函数注册表
//!
//! 参数可以是带引号的字面量、数字或上下文路径；未知函数名原样返回表达式。

use std::sync::LazyLock;

use chrono::{DateTime, Local};
use phf::phf_map;
use regex::Regex;
use serde_json::Value;

use super::condition;
use super::context::{as_number, is_truthy, to_text, Scope};
use super::filters::{
    format_currency, format_date, format_naive, group_thousands, DEFAULT_DATE_PATTERN, MAX_DECIMALS,
};
use crate::error::DirectiveError;

static CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*([A-Za-z_][A-Za-z0-9_]*)\s*\((.*)\)\s*$").expect("call pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    FormatDate,
    Now,
    Concat,
    Case,
    FormatNumber,
    FormatCurrency,
    Default,
    Upper,
    Lower,
}

static FUNCTIONS: phf::Map<&'static str, Function> = phf_map! {
    "formatDate" => Function::FormatDate,
    "now" => Function::Now,
    "today" => Function::Now,
    "concat" => Function::Concat,
    "case" => Function::Case,
    "formatNumber" => Function::FormatNumber,
    "formatCurrency" => Function::FormatCurrency,
    "default" => Function::Default,
    "upper" => Function::Upper,
    "lower" => Function::Lower,
};

/// 一个参数的原始形态
#[derive(Debug, Clone, PartialEq)]
enum Arg<'e> {
    Literal(String),
    Path(&'e str),
}

impl<'e> Arg<'e> {
    fn parse(raw: &'e str) -> Self {
        let raw = raw.trim();
        if let Some(s) = unquote(raw) {
            return Arg::Literal(s.to_string());
        }
        if raw.parse::<f64>().is_ok() {
            return Arg::Literal(raw.to_string());
        }
        Arg::Path(raw)
    }

    fn resolve(&self, scope: &Scope<'_>) -> Option<Value> {
        match self {
            Arg::Literal(s) => Some(Value::String(s.clone())),
            Arg::Path(path) => scope.resolve(path).map(|v| v.into_owned()),
        }
    }

    fn text(&self, scope: &Scope<'_>) -> String {
        self.resolve(scope).map(|v| to_text(&v)).unwrap_or_default()
    }

    /// 作为条件表达式使用时的文本
    fn expression(&self) -> &str {
        match self {
            Arg::Literal(s) => s.as_str(),
            Arg::Path(p) => p,
        }
    }
}

/// 求值 `name(arg, ...)`，返回未转义的文本
pub(crate) fn evaluate_call(
    expr: &str,
    scope: &Scope<'_>,
    now: &DateTime<Local>,
) -> Result<String, DirectiveError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(DirectiveError::EmptyExpression { attr: "data-format" });
    }
    let caps = CALL.captures(expr).ok_or_else(|| DirectiveError::MalformedCall {
        expr: expr.to_string(),
    })?;
    let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    let Some(function) = FUNCTIONS.get(name).copied() else {
        return Ok(expr.to_string());
    };
    let raw_args = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
    let args: Vec<Arg<'_>> = split_args(raw_args)
        .map_err(|reason| invalid(name, reason))?
        .into_iter()
        .map(Arg::parse)
        .collect();

    match function {
        Function::FormatDate => {
            let (value, pattern) = match args.as_slice() {
                [value] => (value, DEFAULT_DATE_PATTERN.to_string()),
                [value, pattern] => (value, pattern.text(scope)),
                _ => return Err(invalid(name, "需要 1 到 2 个参数")),
            };
            Ok(match value.resolve(scope) {
                Some(v) => format_date(&v, &pattern).unwrap_or_else(|| to_text(&v)),
                None => String::new(),
            })
        }
        Function::Now => {
            let pattern = match args.as_slice() {
                [] => DEFAULT_DATE_PATTERN.to_string(),
                [pattern] => pattern.text(scope),
                _ => return Err(invalid(name, "最多 1 个参数")),
            };
            format_naive(&now.naive_local(), &pattern)
                .ok_or_else(|| invalid(name, "日期格式不合法"))
        }
        Function::Concat => Ok(args.iter().map(|a| a.text(scope)).collect()),
        Function::Case => {
            let mut pairs = args.chunks_exact(2);
            for pair in pairs.by_ref() {
                if condition::evaluate(pair[0].expression(), scope)? {
                    return Ok(pair[1].text(scope));
                }
            }
            Ok(pairs
                .remainder()
                .first()
                .map(|fallback| fallback.text(scope))
                .unwrap_or_default())
        }
        Function::FormatNumber => {
            let (value, decimals) = match args.as_slice() {
                [value] => (value, None),
                [value, decimals] => (
                    value,
                    Some(
                        decimals
                            .text(scope)
                            .parse::<usize>()
                            .ok()
                            .filter(|d| *d <= MAX_DECIMALS)
                            .ok_or_else(|| {
                                invalid(name, format!("小数位数必须是 0 到 {} 的整数", MAX_DECIMALS))
                            })?,
                    ),
                ),
                _ => return Err(invalid(name, "需要 1 到 2 个参数")),
            };
            let resolved = value.resolve(scope);
            Ok(match resolved.as_ref().and_then(as_number) {
                Some(n) => {
                    let decimals = decimals.unwrap_or(if n.fract() == 0.0 { 0 } else { 2 });
                    group_thousands(n, decimals)
                }
                None => resolved.map(|v| to_text(&v)).unwrap_or_default(),
            })
        }
        Function::FormatCurrency => {
            let (value, symbol) = match args.as_slice() {
                [value] => (value, String::new()),
                [value, symbol] => (value, symbol.text(scope)),
                _ => return Err(invalid(name, "需要 1 到 2 个参数")),
            };
            let resolved = value.resolve(scope);
            Ok(match resolved.as_ref().and_then(as_number) {
                Some(n) => format_currency(n, &symbol),
                None => resolved.map(|v| to_text(&v)).unwrap_or_default(),
            })
        }
        Function::Default => match args.as_slice() {
            [value, fallback] => {
                let resolved = value.resolve(scope);
                Ok(if is_truthy(resolved.as_ref()) {
                    resolved.map(|v| to_text(&v)).unwrap_or_default()
                } else {
                    fallback.text(scope)
                })
            }
            _ => Err(invalid(name, "需要 2 个参数")),
        },
        Function::Upper | Function::Lower => match args.as_slice() {
            [value] => {
                let text = value.text(scope);
                Ok(if function == Function::Upper {
                    text.to_uppercase()
                } else {
                    text.to_lowercase()
                })
            }
            _ => Err(invalid(name, "需要 1 个参数")),
        },
    }
}

/// 求值 `data-text`：`=` 开头为表达式（函数调用或路径），否则为字面文本
pub(crate) fn evaluate_text(
    expr: &str,
    scope: &Scope<'_>,
    now: &DateTime<Local>,
) -> Result<String, DirectiveError> {
    let Some(body) = expr.trim_start().strip_prefix('=') else {
        return Ok(expr.to_string());
    };
    let body = body.trim();
    if body.is_empty() {
        return Err(DirectiveError::EmptyExpression { attr: "data-text" });
    }
    if CALL.is_match(body) {
        evaluate_call(body, scope, now)
    } else {
        Ok(Arg::parse(body).text(scope))
    }
}

/// 按顶层逗号切分参数，忽略引号和括号内的逗号
fn split_args(raw: &str) -> Result<Vec<&str>, &'static str> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in raw.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.checked_sub(1).ok_or("括号不匹配")?,
            (None, ',') if depth == 0 => {
                args.push(raw[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() {
        return Err("引号未闭合");
    }
    if depth != 0 {
        return Err("括号不匹配");
    }
    args.push(raw[start..].trim());
    if args.iter().any(|a| a.is_empty()) {
        return Err("存在空参数");
    }
    Ok(args)
}

fn unquote(raw: &str) -> Option<&str> {
    raw.strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
}

fn invalid(function: &str, reason: impl Into<String>) -> DirectiveError {
    DirectiveError::InvalidArguments {
        function: function.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).unwrap()
    }

    fn call(expr: &str, data: Value) -> Result<String, DirectiveError> {
        evaluate_call(expr, &Scope::root(&data), &fixed_now())
    }

    #[test]
    fn test_format_date() {
        let data = json!({"report": {"date": "2024-01-15T08:00:00Z"}});
        assert_eq!(call("formatDate(report.date)", data.clone()).unwrap(), "2024-01-15");
        assert_eq!(
            call("formatDate(report.date, 'YYYY年MM月DD日')", data).unwrap(),
            "2024年01月15日"
        );
    }

    #[test]
    fn test_now_uses_injected_clock() {
        assert_eq!(call("now()", json!({})).unwrap(), "2024-06-01");
        assert_eq!(call("now('HH:mm')", json!({})).unwrap(), "09:30");
        assert_eq!(call("today()", json!({})).unwrap(), "2024-06-01");
    }

    #[test]
    fn test_concat_mixes_literals_and_paths() {
        let data = json!({"user": {"first": "Ada", "last": "Lovelace"}});
        assert_eq!(
            call("concat(user.first, ' ', user.last, ', ', 1815)", data).unwrap(),
            "Ada Lovelace, 1815"
        );
    }

    #[test]
    fn test_case_when_dispatch() {
        let expr = "case(score >= 90, 'A', score >= 80, 'B', 'C')";
        assert_eq!(call(expr, json!({"score": 95})).unwrap(), "A");
        assert_eq!(call(expr, json!({"score": 85})).unwrap(), "B");
        assert_eq!(call(expr, json!({"score": 10})).unwrap(), "C");
        assert_eq!(
            call("case(flag, 'on')", json!({"flag": false})).unwrap(),
            ""
        );
    }

    #[test]
    fn test_number_currency_default_case() {
        let data = json!({"total": 1234567.891, "name": "", "code": "ab"});
        assert_eq!(call("formatNumber(total, 1)", data.clone()).unwrap(), "1,234,567.9");
        assert_eq!(call("formatCurrency(total, '¥')", data.clone()).unwrap(), "¥1,234,567.89");
        assert_eq!(call("default(name, 'N/A')", data.clone()).unwrap(), "N/A");
        assert_eq!(call("upper(code)", data).unwrap(), "AB");
    }

    #[test]
    fn test_format_number_rejects_huge_precision() {
        let data = json!({"total": 1.5});
        assert!(matches!(
            call("formatNumber(total, 70000)", data.clone()),
            Err(DirectiveError::InvalidArguments { .. })
        ));
        assert_eq!(call("formatNumber(total, 20)", data).unwrap().len(), 22);
    }

    #[test]
    fn test_unknown_function_returns_expression() {
        assert_eq!(call("sparkle(a, b)", json!({})).unwrap(), "sparkle(a, b)");
    }

    #[test]
    fn test_malformed_calls_are_errors() {
        assert!(matches!(
            call("not a call", json!({})),
            Err(DirectiveError::MalformedCall { .. })
        ));
        assert!(call("concat('a, b)", json!({})).is_err());
        assert!(call("formatDate()", json!({})).is_err());
        assert!(call("concat(a,,b)", json!({})).is_err());
    }

    #[test]
    fn test_text_expressions() {
        let data = json!({"title": "Q3"});
        let scope = Scope::root(&data);
        let now = fixed_now();
        assert_eq!(evaluate_text("=title", &scope, &now).unwrap(), "Q3");
        assert_eq!(
            evaluate_text("=concat('Report ', title)", &scope, &now).unwrap(),
            "Report Q3"
        );
        assert_eq!(evaluate_text("plain words", &scope, &now).unwrap(), "plain words");
        assert!(evaluate_text("=", &scope, &now).is_err());
    }
}
