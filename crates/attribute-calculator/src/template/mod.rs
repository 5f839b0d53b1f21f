//! 模板语言
//!
//! 规则公式使用 Jinja 风格的模板：普通文本与 `{{ expression }}` 表达式块、
//! `{# comment #}` 注释块交替出现。`{% ... %}` 语句块不受支持，编译时报语法错误，
//! 条件逻辑使用 `{{ a if cond else b }}`。
//!
//! # 渲染结果
//!
//! - 模板恰好是一个表达式块时，返回表达式的原生 JSON 值（数字、布尔、列表、对象）
//! - 其他情况拼接为字符串

mod ast;
mod error;
mod eval;
mod filters;
mod lexer;
mod parser;
mod value;

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use error::TemplateError;
pub use eval::{Scope, UndefinedBehavior, evaluate};
pub use parser::parse_expression;
pub use value::{to_text, truthy};

/// 匹配块起始符：表达式 `{{`、注释 `{#`、语句 `{%`
static BLOCK_OPEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[{#%]").expect("block regex is valid"));

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Expr(Expr),
}

/// 编译后的模板
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// 编译模板文本
    pub fn compile(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut cursor = 0;

        while let Some(open) = BLOCK_OPEN_REGEX.find_at(source, cursor) {
            push_text(&mut segments, &source[cursor..open.start()]);
            let opener = open.as_str();

            match opener {
                "{{" => {
                    let close = find_expression_end(source, open.end())
                        .ok_or_else(|| unclosed(opener, open.start()))?;
                    let expr = parse_expression(&source[open.end()..close], open.end())?;
                    segments.push(Segment::Expr(expr));
                    cursor = close + 2;
                }
                "{#" => {
                    let close = source[open.end()..]
                        .find("#}")
                        .ok_or_else(|| unclosed(opener, open.start()))?;
                    cursor = open.end() + close + 2;
                }
                _ => {
                    return Err(TemplateError::syntax(
                        "不支持 `{% ... %}` 语句块，请改用 `{{ a if cond else b }}`",
                        open.start(),
                    ));
                }
            }
        }
        push_text(&mut segments, &source[cursor..]);

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// 字符串是否包含模板语法，不含时可作为字面量直接透传
    pub fn is_templated(source: &str) -> bool {
        BLOCK_OPEN_REGEX.is_match(source)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// 渲染模板
    ///
    /// 单表达式模板返回原生值，未定义结果返回 `null`。
    pub fn render(&self, scope: &Scope<'_>) -> Result<Value, TemplateError> {
        if let [Segment::Expr(expr)] = self.segments.as_slice() {
            return Ok(evaluate(expr, scope)?.unwrap_or(Value::Null));
        }

        let mut output = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => output.push_str(text),
                Segment::Expr(expr) => output.push_str(&to_text(evaluate(expr, scope)?.as_ref())),
            }
        }
        Ok(Value::String(output))
    }
}

fn push_text(segments: &mut Vec<Segment>, text: &str) {
    if !text.is_empty() {
        segments.push(Segment::Text(text.to_string()));
    }
}

fn unclosed(opener: &str, offset: usize) -> TemplateError {
    TemplateError::syntax(format!("未闭合的 `{}`", opener), offset)
}

/// 查找表达式块的结束符 `}}`，跳过字符串字面量中的内容
fn find_expression_end(source: &str, from: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = from;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(_) if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'}' && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            None => {}
        }
        i += 1;
    }

    None
}
