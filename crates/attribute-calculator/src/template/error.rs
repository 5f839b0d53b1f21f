//! 模板错误类型

use thiserror::Error;

/// 模板编译或渲染失败
///
/// 需要 `Clone`：编译失败的公式会连同错误一起保存在规则集中，每次求值时重新返回。
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TemplateError {
    #[error("模板语法错误（偏移 {offset}）: {message}")]
    Syntax { message: String, offset: usize },

    #[error("变量未定义: {0}")]
    UndefinedVariable(String),

    #[error("无法访问未定义值的属性: {0}")]
    UndefinedAttribute(String),

    #[error("未知函数或过滤器: {0}")]
    UnknownFunction(String),

    #[error("类型错误: {0}")]
    Type(String),

    #[error("函数 {function} 参数错误: {message}")]
    Argument { function: String, message: String },
}

impl TemplateError {
    pub(crate) fn syntax(message: impl Into<String>, offset: usize) -> Self {
        Self::Syntax {
            message: message.into(),
            offset,
        }
    }

    pub(crate) fn argument(function: &str, message: impl Into<String>) -> Self {
        Self::Argument {
            function: function.to_string(),
            message: message.into(),
        }
    }
}
