//! 属性计算错误类型

use std::path::PathBuf;

use thiserror::Error;

use crate::template::TemplateError;

/// 规则文档加载失败
///
/// 启动时出现即为致命错误，规则集加载成功前不提供计算服务。
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("规则文件不存在: {}", .0.display())]
    MissingPath(PathBuf),

    #[error("读取规则文件失败 {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("规则文档解析失败: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("规则文档结构无效 ({path}): {message}")]
    InvalidShape { path: String, message: String },
}

impl ConfigurationError {
    pub(crate) fn shape(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidShape {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// 属性计算失败
#[derive(Debug, Error)]
pub enum CalculatorError {
    #[error("目标 {target} 的属性 {attribute} 计算失败: {source}")]
    TemplateEvaluation {
        target: String,
        attribute: String,
        #[source]
        source: TemplateError,
    },
}

pub type Result<T> = std::result::Result<T, CalculatorError>;
