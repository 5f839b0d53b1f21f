//! 属性计算引擎
//!
//! 对每个目标系统，按规则多轮渲染属性公式：每一轮的环境为基础环境叠加
//! 上一轮的结果，结果不再变化（不动点）或达到 [`MAX_PASSES`] 轮时停止。
//! 引擎是纯计算，不做 I/O，也不自行记录错误日志。

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::error::{CalculatorError, Result};
use crate::models::{AccountId, ComputedAttributes, EvaluationContext, RuleSet, TargetAttributes, TargetRules};
use crate::template::{Scope, UndefinedBehavior};

/// 单个目标的最大渲染轮数
pub const MAX_PASSES: usize = 3;

const SOURCE_KEY: &str = "source";
const ACCOUNT_ID_KEY: &str = "accountId";
const GLOBAL_KEY: &str = "global";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CalculatorOptions {
    pub undefined: UndefinedBehavior,
}

/// 单个目标的解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct TargetResolution {
    /// 已剔除 null 值的属性
    pub attributes: TargetAttributes,
    /// 产生最终结果的轮次，不含确认不动点的那一轮
    pub passes: usize,
    /// 是否在轮数上限内达到不动点
    pub converged: bool,
}

/// 属性计算器
///
/// 持有规则集的不可变快照，可在多个线程间共享并发调用。
#[derive(Debug, Clone)]
pub struct Calculator {
    rules: Arc<RuleSet>,
    options: CalculatorOptions,
}

impl Calculator {
    pub fn new(rules: impl Into<Arc<RuleSet>>) -> Self {
        Self {
            rules: rules.into(),
            options: CalculatorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CalculatorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn options(&self) -> CalculatorOptions {
        self.options
    }

    /// 计算目标系统属性
    ///
    /// `targets` 为 `None` 或空列表时按规则集顺序计算所有目标；
    /// 未配置的目标直接跳过。任一属性渲染失败即返回错误，不产生部分结果。
    #[instrument(level = "debug", skip_all, fields(account_id = %account_id))]
    pub fn calculate(
        &self,
        source: &Map<String, Value>,
        account_id: &AccountId,
        targets: Option<&[String]>,
    ) -> Result<ComputedAttributes> {
        let base = self.base_environment(source, account_id);
        let mut results = ComputedAttributes::new();

        for name in self.selected_targets(targets) {
            let Some(rules) = self.rules.target(name) else {
                debug!(target_name = %name, "跳过未配置的目标");
                continue;
            };

            let resolution = self.resolve_target(name, rules, &base)?;
            debug!(
                target_name = %name,
                passes = resolution.passes,
                converged = resolution.converged,
                "目标属性计算完成"
            );
            results.insert(name.to_string(), resolution.attributes);
        }

        Ok(results)
    }

    /// 按请求上下文计算
    pub fn evaluate(&self, ctx: &EvaluationContext) -> Result<ComputedAttributes> {
        self.calculate(&ctx.source_attributes, &ctx.account_id, ctx.targets.as_deref())
    }

    fn selected_targets<'a>(&'a self, targets: Option<&'a [String]>) -> Box<dyn Iterator<Item = &'a str> + 'a> {
        match targets {
            Some(targets) if !targets.is_empty() => Box::new(targets.iter().map(String::as_str)),
            _ => Box::new(self.rules.target_names()),
        }
    }

    /// 构建基础环境
    ///
    /// 源属性、`source`、`accountId` 优先；全局常量放在 `global` 下，
    /// 同时在不冲突时平铺到顶层。
    pub fn base_environment(&self, source: &Map<String, Value>, account_id: &AccountId) -> Map<String, Value> {
        let mut env = source.clone();
        env.insert(SOURCE_KEY.to_string(), Value::Object(source.clone()));
        env.insert(ACCOUNT_ID_KEY.to_string(), account_id.to_value());

        let globals = self.rules.globals();
        if !globals.is_empty() {
            env.insert(GLOBAL_KEY.to_string(), Value::Object(globals.clone()));
            for (key, value) in globals {
                if !env.contains_key(key) {
                    env.insert(key.clone(), value.clone());
                }
            }
        }

        env
    }

    /// 多轮解析单个目标的全部属性
    pub fn resolve_target(&self, name: &str, rules: &TargetRules, base: &Map<String, Value>) -> Result<TargetResolution> {
        let mut current = Map::new();
        let mut passes = 0;
        let mut converged = false;

        for pass in 1..=MAX_PASSES {
            let scope = Scope::new(base)
                .with_overlay(&current)
                .with_undefined(self.options.undefined);
            let rendered = render_pass(name, rules, &scope)?;

            if rendered == current {
                converged = true;
                break;
            }
            current = rendered;
            passes = pass;
        }

        current.retain(|_, value| !value.is_null());

        Ok(TargetResolution {
            attributes: current,
            passes,
            converged,
        })
    }
}

fn render_pass(target: &str, rules: &TargetRules, scope: &Scope<'_>) -> Result<Map<String, Value>> {
    let mut rendered = Map::with_capacity(rules.rules().len());
    for (attribute, formula) in rules.rules() {
        let value = formula
            .resolve(scope)
            .map_err(|source| CalculatorError::TemplateEvaluation {
                target: target.to_string(),
                attribute: attribute.clone(),
                source,
            })?;
        rendered.insert(attribute.clone(), value);
    }
    Ok(rendered)
}
