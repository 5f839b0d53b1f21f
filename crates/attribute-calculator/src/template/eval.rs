//! 表达式求值
//!
//! 求值结果为 `Option<Value>`，`None` 表示未定义。

use serde_json::{Map, Number, Value};

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::error::TemplateError;
use super::filters;
use super::value::{to_text, truthy, type_name};

/// 未定义变量的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UndefinedBehavior {
    /// 未定义变量渲染为空串，允许跨轮次的前向引用
    #[default]
    Lenient,
    /// 引用未定义变量直接报错
    Strict,
}

/// 模板求值时可见的变量命名空间
///
/// 由基础环境和可选的覆盖层组成，覆盖层中的同名变量优先。
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    base: &'a Map<String, Value>,
    overlay: Option<&'a Map<String, Value>>,
    undefined: UndefinedBehavior,
}

impl<'a> Scope<'a> {
    pub fn new(base: &'a Map<String, Value>) -> Self {
        Self {
            base,
            overlay: None,
            undefined: UndefinedBehavior::default(),
        }
    }

    pub fn with_overlay(mut self, overlay: &'a Map<String, Value>) -> Self {
        self.overlay = Some(overlay);
        self
    }

    pub fn with_undefined(mut self, undefined: UndefinedBehavior) -> Self {
        self.undefined = undefined;
        self
    }

    /// 查找变量，覆盖层优先
    pub fn get(&self, name: &str) -> Option<&'a Value> {
        self.overlay
            .and_then(|overlay| overlay.get(name))
            .or_else(|| self.base.get(name))
    }

    pub fn undefined_behavior(&self) -> UndefinedBehavior {
        self.undefined
    }
}

/// 对表达式求值
pub fn evaluate(expr: &Expr, scope: &Scope<'_>) -> Result<Option<Value>, TemplateError> {
    match expr {
        Expr::Literal(value) => Ok(Some(value.clone())),
        Expr::Ident(name) => match scope.get(name) {
            Some(value) => Ok(Some(value.clone())),
            None if scope.undefined_behavior() == UndefinedBehavior::Strict => {
                Err(TemplateError::UndefinedVariable(name.clone()))
            }
            None => Ok(None),
        },
        Expr::List(items) => {
            let values = items
                .iter()
                .map(|item| evaluate(item, scope).map(|v| v.unwrap_or(Value::Null)))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(Value::Array(values)))
        }
        Expr::Attr { target, name } => {
            let base = evaluate(target, scope)?
                .ok_or_else(|| TemplateError::UndefinedAttribute(format!("{}.{}", path_of(target), name)))?;
            Ok(match base {
                Value::Object(mut map) => map.remove(name),
                _ => None,
            })
        }
        Expr::Index { target, index } => {
            let base = evaluate(target, scope)?
                .ok_or_else(|| TemplateError::UndefinedAttribute(format!("{}[...]", path_of(target))))?;
            let index = evaluate(index, scope)?;
            Ok(subscript(base, index.as_ref()))
        }
        Expr::Slice { target, start, end } => {
            let base = evaluate(target, scope)?
                .ok_or_else(|| TemplateError::UndefinedAttribute(format!("{}[:]", path_of(target))))?;
            let start = bound(start.as_deref(), scope)?;
            let end = bound(end.as_deref(), scope)?;
            slice(base, start, end)
        }
        Expr::Call { function, args } => {
            let mut values = evaluate_args(args, scope)?.into_iter();
            let first = values.next().ok_or_else(|| {
                TemplateError::argument(function, "至少需要 1 个参数")
            })?;
            let rest: Vec<Value> = values.map(|v| v.unwrap_or(Value::Null)).collect();
            filters::call(function, first, &rest)
        }
        Expr::Filter { value, name, args } => {
            let value = evaluate(value, scope)?;
            let rest: Vec<Value> = evaluate_args(args, scope)?
                .into_iter()
                .map(|v| v.unwrap_or(Value::Null))
                .collect();
            filters::call(name, value, &rest)
        }
        Expr::Unary { op, expr } => {
            let value = evaluate(expr, scope)?;
            match op {
                UnaryOp::Not => Ok(Some(Value::Bool(!truthy(value.as_ref())))),
                UnaryOp::Neg => negate(value),
            }
        }
        Expr::Binary { op, left, right } => binary(*op, left, right, scope),
        Expr::Conditional {
            cond,
            then,
            otherwise,
        } => {
            if truthy(evaluate(cond, scope)?.as_ref()) {
                evaluate(then, scope)
            } else {
                match otherwise {
                    Some(otherwise) => evaluate(otherwise, scope),
                    None => Ok(None),
                }
            }
        }
    }
}

fn evaluate_args(args: &[Expr], scope: &Scope<'_>) -> Result<Vec<Option<Value>>, TemplateError> {
    args.iter().map(|arg| evaluate(arg, scope)).collect()
}

/// 用于错误信息的表达式路径，如 `global.ldap`
fn path_of(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::Attr { target, name } => format!("{}.{}", path_of(target), name),
        Expr::Index { target, .. } => format!("{}[...]", path_of(target)),
        _ => "<expr>".to_string(),
    }
}

fn binary(op: BinaryOp, left: &Expr, right: &Expr, scope: &Scope<'_>) -> Result<Option<Value>, TemplateError> {
    // and / or 短路求值，返回操作数本身
    match op {
        BinaryOp::And => {
            let l = evaluate(left, scope)?;
            return if truthy(l.as_ref()) {
                evaluate(right, scope)
            } else {
                Ok(l)
            };
        }
        BinaryOp::Or => {
            let l = evaluate(left, scope)?;
            return if truthy(l.as_ref()) {
                Ok(l)
            } else {
                evaluate(right, scope)
            };
        }
        _ => {}
    }

    let l = evaluate(left, scope)?;
    let r = evaluate(right, scope)?;

    match op {
        BinaryOp::Concat => Ok(Some(Value::String(
            to_text(l.as_ref()) + &to_text(r.as_ref()),
        ))),
        BinaryOp::Add => add(l, r),
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => arithmetic(op, l, r),
        BinaryOp::Eq => Ok(Some(Value::Bool(values_equal(l.as_ref(), r.as_ref())))),
        BinaryOp::Ne => Ok(Some(Value::Bool(!values_equal(l.as_ref(), r.as_ref())))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => compare(op, l, r),
        BinaryOp::In => contains(r.as_ref(), l.as_ref()).map(|b| Some(Value::Bool(b))),
        BinaryOp::NotIn => contains(r.as_ref(), l.as_ref()).map(|b| Some(Value::Bool(!b))),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

/// `+`：数字相加、字符串拼接（未定义视为空串）、列表拼接
fn add(l: Option<Value>, r: Option<Value>) -> Result<Option<Value>, TemplateError> {
    match (l, r) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => numeric(BinaryOp::Add, &a, &b).map(Some),
        (Some(Value::Array(mut a)), Some(Value::Array(b))) => {
            a.extend(b);
            Ok(Some(Value::Array(a)))
        }
        (l @ (Some(Value::String(_)) | None), r @ (Some(Value::String(_)) | None)) => {
            if l.is_none() && r.is_none() {
                return Ok(None);
            }
            Ok(Some(Value::String(to_text(l.as_ref()) + &to_text(r.as_ref()))))
        }
        // 未定义参与数值运算时结果仍为未定义
        (None, Some(Value::Number(_))) | (Some(Value::Number(_)), None) => Ok(None),
        (l, r) => Err(TemplateError::Type(format!(
            "无法对 {} 和 {} 执行 +",
            type_name(l.as_ref()),
            type_name(r.as_ref())
        ))),
    }
}

fn arithmetic(op: BinaryOp, l: Option<Value>, r: Option<Value>) -> Result<Option<Value>, TemplateError> {
    match (l, r) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => numeric(op, &a, &b).map(Some),
        (None, _) | (_, None) => Ok(None),
        (l, r) => Err(TemplateError::Type(format!(
            "无法对 {} 和 {} 执行算术运算",
            type_name(l.as_ref()),
            type_name(r.as_ref())
        ))),
    }
}

/// 整数优先运算，溢出或除法时退化为浮点
fn numeric(op: BinaryOp, a: &Number, b: &Number) -> Result<Value, TemplateError> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        let exact = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Sub => x.checked_sub(y),
            BinaryOp::Mul => x.checked_mul(y),
            BinaryOp::Rem if y == 0 => return Err(TemplateError::Type("取模运算除数为 0".into())),
            BinaryOp::Rem => x.checked_rem_euclid(y),
            _ => None,
        };
        if let Some(result) = exact {
            return Ok(Value::from(result));
        }
    }

    let (x, y) = match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x, y),
        _ => return Err(TemplateError::Type("无法识别的数字".into())),
    };

    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div if y == 0.0 => return Err(TemplateError::Type("除数为 0".into())),
        BinaryOp::Div => x / y,
        BinaryOp::Rem if y == 0.0 => return Err(TemplateError::Type("取模运算除数为 0".into())),
        BinaryOp::Rem => x.rem_euclid(y),
        other => unreachable!("not an arithmetic operator: {:?}", other),
    };

    Ok(Value::from(result))
}

fn negate(value: Option<Value>) -> Result<Option<Value>, TemplateError> {
    match value {
        None => Ok(None),
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64().and_then(i64::checked_neg) {
                return Ok(Some(Value::from(i)));
            }
            Ok(n.as_f64().map(|f| Value::from(-f)))
        }
        Some(other) => Err(TemplateError::Type(format!(
            "无法对 {} 取负",
            type_name(Some(&other))
        ))),
    }
}

/// 数值按浮点比较，避免 1 与 1.0 不等
fn values_equal(l: Option<&Value>, r: Option<&Value>) -> bool {
    match (l, r) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
        (l, r) => l == r,
    }
}

fn compare(op: BinaryOp, l: Option<Value>, r: Option<Value>) -> Result<Option<Value>, TemplateError> {
    let ordering = match (&l, &r) {
        (None, _) | (_, None) => return Ok(Some(Value::Bool(false))),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(x, y)| x.partial_cmp(&y)),
        (Some(Value::String(a)), Some(Value::String(b))) => Some(a.cmp(b)),
        _ => None,
    };

    let ordering = ordering.ok_or_else(|| {
        TemplateError::Type(format!(
            "无法比较 {} 和 {}",
            type_name(l.as_ref()),
            type_name(r.as_ref())
        ))
    })?;

    let result = match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::Ge => ordering.is_ge(),
        other => unreachable!("not a comparison operator: {:?}", other),
    };
    Ok(Some(Value::Bool(result)))
}

/// `needle in haystack`
fn contains(haystack: Option<&Value>, needle: Option<&Value>) -> Result<bool, TemplateError> {
    match haystack {
        None | Some(Value::Null) => Ok(false),
        Some(Value::String(s)) => match needle {
            Some(Value::String(n)) => Ok(s.contains(n.as_str())),
            None => Ok(false),
            other => Err(TemplateError::Type(format!(
                "字符串包含判断需要 string，实际为 {}",
                type_name(other)
            ))),
        },
        Some(Value::Array(items)) => Ok(items.iter().any(|item| values_equal(Some(item), needle))),
        Some(Value::Object(map)) => Ok(match needle {
            Some(Value::String(key)) => map.contains_key(key),
            _ => false,
        }),
        other => Err(TemplateError::Type(format!(
            "{} 不支持 in 运算",
            type_name(other)
        ))),
    }
}

/// 下标访问：数组/字符串按位置（支持负数），对象按键
fn subscript(base: Value, index: Option<&Value>) -> Option<Value> {
    match (base, index) {
        (Value::Array(mut items), Some(Value::Number(n))) => {
            let i = normalize_index(n.as_i64()?, items.len())?;
            Some(items.swap_remove(i))
        }
        (Value::String(s), Some(Value::Number(n))) => {
            let chars: Vec<char> = s.chars().collect();
            let i = normalize_index(n.as_i64()?, chars.len())?;
            Some(Value::String(chars[i].to_string()))
        }
        (Value::Object(mut map), Some(Value::String(key))) => map.remove(key),
        _ => None,
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let i = if index < 0 { len + index } else { index };
    (0..len).contains(&i).then_some(i as usize)
}

fn bound(expr: Option<&Expr>, scope: &Scope<'_>) -> Result<Option<i64>, TemplateError> {
    let Some(expr) = expr else {
        return Ok(None);
    };
    match evaluate(expr, scope)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| TemplateError::Type("切片边界必须是整数".into())),
        Some(other) => Err(TemplateError::Type(format!(
            "切片边界必须是整数，实际为 {}",
            type_name(Some(&other))
        ))),
    }
}

/// Python 风格切片，越界自动截断
fn slice(base: Value, start: Option<i64>, end: Option<i64>) -> Result<Option<Value>, TemplateError> {
    fn clamp(bound: Option<i64>, len: i64, default: i64) -> usize {
        let value = match bound {
            None => default,
            Some(b) if b < 0 => (len + b).max(0),
            Some(b) => b.min(len),
        };
        value as usize
    }

    match base {
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len() as i64;
            let (from, to) = (clamp(start, len, 0), clamp(end, len, len));
            let sliced: String = if from < to { chars[from..to].iter().collect() } else { String::new() };
            Ok(Some(Value::String(sliced)))
        }
        Value::Array(items) => {
            let len = items.len() as i64;
            let (from, to) = (clamp(start, len, 0), clamp(end, len, len));
            let sliced = if from < to { items[from..to].to_vec() } else { Vec::new() };
            Ok(Some(Value::Array(sliced)))
        }
        other => Err(TemplateError::Type(format!(
            "{} 不支持切片",
            type_name(Some(&other))
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::parser::parse_expression;
    use serde_json::json;

    fn env() -> Map<String, Value> {
        match json!({
            "firstname": "Jean",
            "lastname": "Dupont",
            "age": 41,
            "groups": ["staff", "finance"],
            "global": {"domain": "sae.com", "ldap": {"base_dn": "dc=sae,dc=com"}},
            "empty": "",
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn eval(source: &str) -> Option<Value> {
        let base = env();
        let scope = Scope::new(&base);
        evaluate(&parse_expression(source, 0).unwrap(), &scope).unwrap()
    }

    fn eval_err(source: &str) -> TemplateError {
        let base = env();
        let scope = Scope::new(&base);
        evaluate(&parse_expression(source, 0).unwrap(), &scope).unwrap_err()
    }

    #[test]
    fn test_concat_and_filters() {
        assert_eq!(eval("(firstname ~ '.' ~ lastname) | lower"), Some(json!("jean.dupont")));
        assert_eq!(eval("lower(firstname + '.' + lastname)"), Some(json!("jean.dupont")));
        assert_eq!(eval("(firstname[0] ~ lastname) | lower"), Some(json!("jdupont")));
    }

    #[test]
    fn test_undefined_is_lenient_by_default() {
        assert_eq!(eval("login"), None);
        assert_eq!(eval("login ~ '@' ~ global.domain"), Some(json!("@sae.com")));
        assert_eq!(eval("login + '@' + global.domain"), Some(json!("@sae.com")));
        assert_eq!(eval("login + 1"), None);
        assert_eq!(eval("global.missing"), None);
    }

    #[test]
    fn test_attribute_of_undefined_is_an_error() {
        assert_eq!(
            eval_err("settings.domain"),
            TemplateError::UndefinedAttribute("settings.domain".into())
        );
    }

    #[test]
    fn test_strict_undefined() {
        let base = env();
        let scope = Scope::new(&base).with_undefined(UndefinedBehavior::Strict);
        let err = evaluate(&parse_expression("login", 0).unwrap(), &scope).unwrap_err();
        assert_eq!(err, TemplateError::UndefinedVariable("login".into()));
    }

    #[test]
    fn test_overlay_takes_precedence() {
        let base = env();
        let overlay = match json!({"firstname": "Alice"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let scope = Scope::new(&base).with_overlay(&overlay);
        assert_eq!(scope.get("firstname"), Some(&json!("Alice")));
        assert_eq!(scope.get("lastname"), Some(&json!("Dupont")));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("age + 1"), Some(json!(42)));
        assert_eq!(eval("age * 2 - 2"), Some(json!(80)));
        assert_eq!(eval("age / 2"), Some(json!(20.5)));
        assert_eq!(eval("age % 10"), Some(json!(1)));
        assert_eq!(eval("-age"), Some(json!(-41)));
        assert!(matches!(eval_err("age / 0"), TemplateError::Type(_)));
        assert!(matches!(eval_err("age + firstname"), TemplateError::Type(_)));
    }

    #[test]
    fn test_logic_and_comparison() {
        assert_eq!(eval("age >= 18 and 'finance' in groups"), Some(json!(true)));
        assert_eq!(eval("'it' not in groups"), Some(json!(true)));
        assert_eq!(eval("empty or firstname"), Some(json!("Jean")));
        assert_eq!(eval("not empty"), Some(json!(true)));
        assert_eq!(eval("age == 41.0"), Some(json!(true)));
        assert_eq!(eval("'Dup' in lastname"), Some(json!(true)));
        assert_eq!(eval("'domain' in global"), Some(json!(true)));
    }

    #[test]
    fn test_conditional() {
        assert_eq!(eval("'adult' if age > 17 else 'minor'"), Some(json!("adult")));
        assert_eq!(eval("'x' if empty"), None);
    }

    #[test]
    fn test_subscripts_and_slices() {
        assert_eq!(eval("groups[-1]"), Some(json!("finance")));
        assert_eq!(eval("groups[5]"), None);
        assert_eq!(eval("global['domain']"), Some(json!("sae.com")));
        assert_eq!(eval("global.ldap.base_dn"), Some(json!("dc=sae,dc=com")));
        assert_eq!(eval("lastname[:3]"), Some(json!("Dup")));
        assert_eq!(eval("lastname[-2:]"), Some(json!("nt")));
        assert_eq!(eval("groups[1:]"), Some(json!(["finance"])));
        assert_eq!(eval("lastname[4:2]"), Some(json!("")));
    }

    #[test]
    fn test_list_literal() {
        assert_eq!(eval("[firstname, missing, 1]"), Some(json!(["Jean", null, 1])));
        assert_eq!(eval("[firstname, lastname] | join(' ')"), Some(json!("Jean Dupont")));
    }

    #[test]
    fn test_call_without_arguments() {
        assert!(matches!(eval_err("lower()"), TemplateError::Argument { .. }));
    }
}
