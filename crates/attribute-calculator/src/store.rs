//! 规则存储
//!
//! 进程内唯一的规则集容器。读取端通过 `ArcSwap::load` 获取不可变快照，
//! 重新加载时整体原子替换，进行中的计算不会看到更新到一半的规则集。

use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::info;

use crate::engine::{Calculator, CalculatorOptions};
use crate::error::ConfigurationError;
use crate::models::RuleSet;

#[derive(Clone)]
pub struct RuleStore {
    current: Arc<ArcSwap<RuleSet>>,
    options: CalculatorOptions,
}

impl RuleStore {
    pub fn new(rule_set: RuleSet) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(rule_set)),
            options: CalculatorOptions::default(),
        }
    }

    /// 从规则文件创建，失败即为启动错误
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        Ok(Self::new(RuleSet::from_file(path)?))
    }

    pub fn with_options(mut self, options: CalculatorOptions) -> Self {
        self.options = options;
        self
    }

    /// 当前规则集快照
    pub fn load(&self) -> Arc<RuleSet> {
        self.current.load_full()
    }

    /// 基于当前快照的计算器
    pub fn calculator(&self) -> Calculator {
        Calculator::new(self.load()).with_options(self.options)
    }

    /// 原子替换规则集
    pub fn replace(&self, rule_set: RuleSet) {
        self.current.store(Arc::new(rule_set));
    }

    /// 重新读取规则文件，校验失败时保留当前规则集
    pub fn reload_from(&self, path: impl AsRef<Path>) -> Result<usize, ConfigurationError> {
        let rule_set = RuleSet::from_file(path)?;
        let targets = rule_set.target_count();
        self.replace(rule_set);
        info!(targets, "规则集已替换");
        Ok(targets)
    }

    /// 共享同一规则集容器的句柄数量
    #[cfg(test)]
    pub(crate) fn holders(&self) -> usize {
        Arc::strong_count(&self.current)
    }
}
