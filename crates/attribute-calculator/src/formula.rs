//! 属性公式
//!
//! 公式在规则集构建时编译一次：字符串编译为模板，映射和序列递归编译，
//! 其余值作为字面量原样透传。编译失败的模板连同错误一起保留，
//! 只在对应属性被计算时报告。

use serde_json::{Map, Value};

use crate::template::{Scope, Template, TemplateError};

#[derive(Debug, Clone, PartialEq)]
pub enum Formula {
    /// 非模板值，原样输出
    Literal(Value),
    Template(Template),
    /// 语法错误的模板
    Invalid { source: String, error: TemplateError },
    Sequence(Vec<Formula>),
    Mapping(Vec<(String, Formula)>),
}

impl Formula {
    pub fn compile(value: &Value) -> Self {
        match value {
            Value::String(source) if Template::is_templated(source) => match Template::compile(source) {
                Ok(template) => Formula::Template(template),
                Err(error) => Formula::Invalid {
                    source: source.clone(),
                    error,
                },
            },
            Value::Array(items) => Formula::Sequence(items.iter().map(Formula::compile).collect()),
            Value::Object(map) => Formula::Mapping(
                map.iter()
                    .map(|(key, value)| (key.clone(), Formula::compile(value)))
                    .collect(),
            ),
            other => Formula::Literal(other.clone()),
        }
    }

    /// 在给定作用域中求值，保持嵌套结构
    pub fn resolve(&self, scope: &Scope<'_>) -> Result<Value, TemplateError> {
        match self {
            Formula::Literal(value) => Ok(value.clone()),
            Formula::Template(template) => template.render(scope),
            Formula::Invalid { error, .. } => Err(error.clone()),
            Formula::Sequence(items) => items
                .iter()
                .map(|item| item.resolve(scope))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Formula::Mapping(entries) => {
                let mut map = Map::with_capacity(entries.len());
                for (key, formula) in entries {
                    map.insert(key.clone(), formula.resolve(scope)?);
                }
                Ok(Value::Object(map))
            }
        }
    }

    /// 公式中是否存在模板（含编译失败的模板）
    pub fn is_dynamic(&self) -> bool {
        match self {
            Formula::Literal(_) => false,
            Formula::Template(_) | Formula::Invalid { .. } => true,
            Formula::Sequence(items) => items.iter().any(Formula::is_dynamic),
            Formula::Mapping(entries) => entries.iter().any(|(_, f)| f.is_dynamic()),
        }
    }

    /// 第一个编译失败的模板错误，用于加载后的检查报告
    pub fn compile_error(&self) -> Option<&TemplateError> {
        match self {
            Formula::Literal(_) | Formula::Template(_) => None,
            Formula::Invalid { error, .. } => Some(error),
            Formula::Sequence(items) => items.iter().find_map(Formula::compile_error),
            Formula::Mapping(entries) => entries.iter().find_map(|(_, f)| f.compile_error()),
        }
    }
}
