//! `data-if` 条件表达式
//!
//! 不做运算符优先级，也不支持括号：先按 `&&` 切分（各段都为真），
//! 每段再按 `||` 切分（任一为真），最后处理前缀 `!` 和比较。
//! 因此 `a && b || c` 等价于 `a && (b || c)`。
//! 切分不识别引号，带引号的字面量里不能出现 `&&` 或 `||`：
//! `status == 'a && b'` 会被切成 `status == 'a` 和 `b'` 两段。

use std::cmp::Ordering;

use serde_json::Value;

use super::context::{as_number, is_truthy, to_text, Scope};
use crate::error::DirectiveError;

/// 支持的比较运算符，两字符的排在前面
const OPERATORS: &[(&str, Op)] = &[
    (">=", Op::Ge),
    ("<=", Op::Le),
    ("==", Op::Eq),
    ("!=", Op::Ne),
    (">", Op::Gt),
    ("<", Op::Lt),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
}

pub(crate) fn evaluate(expression: &str, scope: &Scope<'_>) -> Result<bool, DirectiveError> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Err(DirectiveError::EmptyExpression { attr: "data-if" });
    }
    let has_empty_term = expression
        .split("&&")
        .flat_map(|part| part.split("||"))
        .any(|term| term.trim().trim_start_matches('!').trim().is_empty());
    if has_empty_term {
        return Err(DirectiveError::MalformedCondition {
            expr: expression.to_string(),
        });
    }

    for conjunct in expression.split("&&") {
        if !evaluate_disjunction(conjunct, scope, expression)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn evaluate_disjunction(part: &str, scope: &Scope<'_>, whole: &str) -> Result<bool, DirectiveError> {
    for term in part.split("||") {
        if evaluate_term(term, scope, whole)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn evaluate_term(term: &str, scope: &Scope<'_>, whole: &str) -> Result<bool, DirectiveError> {
    let term = term.trim();
    if term.is_empty() {
        return Err(DirectiveError::MalformedCondition {
            expr: whole.to_string(),
        });
    }
    if let Some(rest) = term.strip_prefix('!') {
        if !rest.starts_with('=') {
            return Ok(!evaluate_term(rest, scope, whole)?);
        }
    }

    match find_operator(term) {
        Some((at, token, op)) => {
            let path = term[..at].trim();
            let literal = term[at + token.len()..].trim();
            if path.is_empty() || literal.is_empty() {
                return Err(DirectiveError::MalformedCondition {
                    expr: whole.to_string(),
                });
            }
            let left = scope.resolve(path);
            Ok(compare(left.as_deref(), op, &parse_literal(literal)))
        }
        None => Ok(is_truthy(scope.resolve(term).as_deref())),
    }
}

/// 最靠左的运算符；同一位置优先匹配两字符运算符
fn find_operator(term: &str) -> Option<(usize, &'static str, Op)> {
    let mut best: Option<(usize, &'static str, Op)> = None;
    for (token, op) in OPERATORS {
        if let Some(at) = term.find(token) {
            let better = match best {
                None => true,
                Some((best_at, best_token, _)) => {
                    at < best_at || (at == best_at && token.len() > best_token.len())
                }
            };
            if better {
                best = Some((at, token, *op));
            }
        }
    }
    best
}

fn parse_literal(raw: &str) -> Literal {
    let unquoted = raw
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')));
    if let Some(s) = unquoted {
        return Literal::Str(s.to_string());
    }
    match raw {
        "true" => Literal::Bool(true),
        "false" => Literal::Bool(false),
        "null" | "undefined" => Literal::Null,
        _ => raw
            .parse::<f64>()
            .map(Literal::Number)
            .unwrap_or_else(|_| Literal::Str(raw.to_string())),
    }
}

fn compare(left: Option<&Value>, op: Op, right: &Literal) -> bool {
    let ordering = match right {
        Literal::Null => {
            let is_null = matches!(left, None | Some(Value::Null));
            return match op {
                Op::Eq => is_null,
                Op::Ne => !is_null,
                _ => false,
            };
        }
        Literal::Bool(b) => {
            let equal = matches!(left, Some(Value::Bool(v)) if v == b)
                || matches!(left, Some(Value::String(s)) if s == &b.to_string());
            return match op {
                Op::Eq => equal,
                Op::Ne => !equal,
                _ => false,
            };
        }
        Literal::Number(n) => match left.and_then(as_number) {
            Some(l) => l.partial_cmp(n),
            None => return op == Op::Ne,
        },
        Literal::Str(s) => match left {
            None | Some(Value::Null) => {
                return op == Op::Ne;
            }
            Some(value) => Some(to_text(value).as_str().cmp(s.as_str())),
        },
    };

    match (op, ordering) {
        (_, None) => op == Op::Ne,
        (Op::Eq, Some(o)) => o == Ordering::Equal,
        (Op::Ne, Some(o)) => o != Ordering::Equal,
        (Op::Gt, Some(o)) => o == Ordering::Greater,
        (Op::Lt, Some(o)) => o == Ordering::Less,
        (Op::Ge, Some(o)) => o != Ordering::Less,
        (Op::Le, Some(o)) => o != Ordering::Greater,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(expr: &str, data: Value) -> bool {
        evaluate(expr, &Scope::root(&data)).unwrap()
    }

    #[test]
    fn test_logical_operators_split_inside_quotes() {
        let data = json!({"status": "a && b"});
        assert!(!eval("status == 'a && b'", data.clone()));
        assert!(eval("status != 'a'", data));
    }

    #[test]
    fn test_numeric_comparisons() {
        let data = json!({"progress": {"percent": 80}});
        assert!(eval("progress.percent>50", data.clone()));
        assert!(!eval("progress.percent < 50", data.clone()));
        assert!(eval("progress.percent >= 80", data.clone()));
        assert!(eval("progress.percent <= 80", data.clone()));
        assert!(eval("progress.percent == 80", data.clone()));
        assert!(eval("progress.percent != 81", data.clone()));
        assert!(!eval("progress.percent>50", json!({"progress": {"percent": 30}})));
    }

    #[test]
    fn test_string_and_literal_comparisons() {
        let data = json!({"status": "done", "flag": true, "gone": null});
        assert!(eval("status == 'done'", data.clone()));
        assert!(eval("status == done", data.clone()));
        assert!(eval("status != \"open\"", data.clone()));
        assert!(eval("flag == true", data.clone()));
        assert!(eval("gone == null", data.clone()));
        assert!(eval("missing == null", data.clone()));
        assert!(!eval("missing > 3", data.clone()));
        assert!(eval("missing != 3", data));
    }

    #[test]
    fn test_bare_path_truthiness_and_negation() {
        let data = json!({"items": [1], "empty": [], "name": "x", "blank": ""});
        assert!(eval("items", data.clone()));
        assert!(!eval("empty", data.clone()));
        assert!(eval("name", data.clone()));
        assert!(!eval("blank", data.clone()));
        assert!(!eval("nothing", data.clone()));
        assert!(eval("!nothing", data.clone()));
        assert!(eval("!!name", data));
    }

    #[test]
    fn test_split_order_is_not_boolean_precedence() {
        // 按优先级应为 (a && b) || c = true；按切分顺序为 a && (b || c) = false
        let data = json!({"a": false, "b": false, "c": true});
        assert!(!eval("a && b || c", data.clone()));
        assert!(eval("c || a && c", data.clone()));
        assert!(eval("c && a || c", data));
    }

    #[test]
    fn test_malformed_expressions() {
        let data = json!({});
        let scope = Scope::root(&data);
        assert!(evaluate("", &scope).is_err());
        assert!(evaluate("a &&", &scope).is_err());
        assert!(evaluate("> 5", &scope).is_err());
        assert!(evaluate("a ==", &scope).is_err());
    }
}
