//! 内置函数与过滤器
//!
//! 函数调用和过滤器共用同一张表：`lower(x)` 与 `x | lower` 等价，
//! 被处理的值总是第一个参数。

use serde_json::Value;

use super::error::TemplateError;
use super::value::{to_text, type_name};

/// 所有可用的函数名
pub(crate) const BUILTINS: &[&str] = &[
    "lower",
    "upper",
    "trim",
    "title",
    "capitalize",
    "replace",
    "default",
    "d",
    "length",
    "count",
    "join",
    "first",
    "last",
    "string",
    "int",
];

pub(crate) fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// 调用内置函数
///
/// `value` 为 `None` 表示未定义；附加参数中的未定义值已转换为 null。
pub fn call(name: &str, value: Option<Value>, args: &[Value]) -> Result<Option<Value>, TemplateError> {
    match name {
        "lower" => Ok(map_str(value, |s| s.to_lowercase())),
        "upper" => Ok(map_str(value, |s| s.to_uppercase())),
        "trim" => Ok(map_str(value, |s| s.trim().to_string())),
        "title" => Ok(map_str(value, title)),
        "capitalize" => Ok(map_str(value, capitalize)),
        "replace" => replace(value, args),
        "default" | "d" => Ok(default(value, args)),
        "length" | "count" => length(name, value),
        "join" => Ok(join(value, args)),
        "first" => Ok(first(value)),
        "last" => Ok(last(value)),
        "string" => Ok(Some(Value::String(to_text(value.as_ref())))),
        "int" => Ok(Some(int(value, args))),
        other => Err(TemplateError::UnknownFunction(other.to_string())),
    }
}

/// 只对字符串生效，其他类型原样透传
fn map_str(value: Option<Value>, f: impl Fn(&str) -> String) -> Option<Value> {
    match value {
        Some(Value::String(s)) => Some(Value::String(f(&s))),
        other => other,
    }
}

fn title(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut word_start = true;
    for c in s.chars() {
        if c.is_alphanumeric() {
            if word_start {
                result.extend(c.to_uppercase());
            } else {
                result.extend(c.to_lowercase());
            }
            word_start = false;
        } else {
            result.push(c);
            word_start = true;
        }
    }
    result
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

fn replace(value: Option<Value>, args: &[Value]) -> Result<Option<Value>, TemplateError> {
    let (old, new) = match args {
        [old, new] => (to_text(Some(old)), to_text(Some(new))),
        _ => return Err(TemplateError::argument("replace", "需要 2 个参数 (old, new)")),
    };
    if old.is_empty() {
        return Err(TemplateError::argument("replace", "old 不能为空字符串"));
    }
    Ok(map_str(value, |s| s.replace(&old, &new)))
}

/// 未定义或 null 时返回默认值（缺省为空串）
fn default(value: Option<Value>, args: &[Value]) -> Option<Value> {
    match value {
        None | Some(Value::Null) => Some(
            args.first()
                .cloned()
                .unwrap_or_else(|| Value::String(String::new())),
        ),
        other => other,
    }
}

fn length(name: &str, value: Option<Value>) -> Result<Option<Value>, TemplateError> {
    let len = match &value {
        None | Some(Value::Null) => 0,
        Some(Value::String(s)) => s.chars().count(),
        Some(Value::Array(arr)) => arr.len(),
        Some(Value::Object(obj)) => obj.len(),
        other => {
            return Err(TemplateError::Type(format!(
                "{} 不支持 {} 类型",
                name,
                type_name(other.as_ref())
            )));
        }
    };
    Ok(Some(Value::from(len)))
}

fn join(value: Option<Value>, args: &[Value]) -> Option<Value> {
    let separator = args.first().map(|v| to_text(Some(v))).unwrap_or_default();
    match value {
        Some(Value::Array(items)) => Some(Value::String(
            items
                .iter()
                .map(|item| to_text(Some(item)))
                .collect::<Vec<_>>()
                .join(&separator),
        )),
        None | Some(Value::Null) => Some(Value::String(String::new())),
        other => other,
    }
}

fn first(value: Option<Value>) -> Option<Value> {
    match value? {
        Value::Array(items) => items.into_iter().next(),
        Value::String(s) => s.chars().next().map(|c| Value::String(c.to_string())),
        _ => None,
    }
}

fn last(value: Option<Value>) -> Option<Value> {
    match value? {
        Value::Array(mut items) => items.pop(),
        Value::String(s) => s.chars().last().map(|c| Value::String(c.to_string())),
        _ => None,
    }
}

/// 转换为整数，失败时使用第一个参数（缺省 0）
fn int(value: Option<Value>, args: &[Value]) -> Value {
    let fallback = || args.first().cloned().unwrap_or_else(|| Value::from(0));
    match value {
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => Value::from(i),
            None => n
                .as_f64()
                .map(|f| Value::from(f.trunc() as i64))
                .unwrap_or_else(fallback),
        },
        Some(Value::Bool(b)) => Value::from(i64::from(b)),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f.trunc() as i64))
                .map(Value::from)
                .unwrap_or_else(fallback)
        }
        _ => fallback(),
    }
}
