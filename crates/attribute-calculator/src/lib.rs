//! IAM 网关属性计算器
//!
//! 根据声明式规则集，为每个下游目标系统（目录服务、数据库、业务应用）
//! 从上游身份治理系统提供的源属性计算目标属性。
//!
//! - 规则存储：加载并校验规则文档，支持原子替换和热更新
//! - 计算引擎：多轮模板渲染，同一目标内属性互相引用时逐轮收敛
//! - HTTP 与 CLI 前端

pub mod cli;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod formula;
pub mod http;
pub mod loader;
pub mod models;
pub mod store;
pub mod template;
pub mod watcher;

pub use engine::{Calculator, CalculatorOptions, MAX_PASSES, TargetResolution};
pub use error::{CalculatorError, ConfigurationError, Result};
pub use models::{AccountId, ComputedAttributes, EvaluationContext, RuleSet, TargetAttributes, TargetRules};
pub use store::RuleStore;
