//! 规则文档加载
//!
//! 文档为 YAML（JSON 是其子集）：
//!
//! ```yaml
//! global:
//!   domain: sae.com
//! targets:
//!   LDAP:
//!     rules:
//!       login: "{{ (firstname ~ '.' ~ lastname) | lower }}"
//!     object_classes: [inetOrgPerson]
//! ```
//!
//! 只校验结构，不校验模板语法。

use std::path::Path;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::error::ConfigurationError;
use crate::models::{RuleSet, TargetRules};

const TARGETS_KEY: &str = "targets";
const RULES_KEY: &str = "rules";
const GLOBAL_KEY: &str = "global";

impl RuleSet {
    /// 从文件加载规则集
    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigurationError::MissingPath(path.to_path_buf()));
        }

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let rule_set = Self::from_yaml_str(&raw)?;
        debug!(targets = rule_set.target_count(), "规则文档已加载");
        Ok(rule_set)
    }

    /// 从 YAML/JSON 文本解析规则集
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigurationError> {
        let document: Value = serde_yaml::from_str(raw)?;
        Self::from_value(&document)
    }

    /// 从已解析的文档构建规则集并校验结构
    pub fn from_value(document: &Value) -> Result<Self, ConfigurationError> {
        let root = document
            .as_object()
            .ok_or_else(|| ConfigurationError::shape("$", "顶层必须是映射"))?;

        let targets = match root.get(TARGETS_KEY) {
            None | Some(Value::Null) => {
                return Err(ConfigurationError::shape(TARGETS_KEY, "缺少 targets 配置"));
            }
            Some(Value::Object(targets)) => targets,
            Some(other) => {
                return Err(ConfigurationError::shape(
                    TARGETS_KEY,
                    format!("必须是映射，实际为 {}", kind(other)),
                ));
            }
        };

        if targets.is_empty() {
            return Err(ConfigurationError::shape(TARGETS_KEY, "至少需要配置一个目标"));
        }

        let mut parsed = IndexMap::with_capacity(targets.len());
        for (name, target) in targets {
            parsed.insert(name.clone(), parse_target(name, target)?);
        }

        let globals = match root.get(GLOBAL_KEY) {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(globals)) => globals.clone(),
            Some(other) => {
                return Err(ConfigurationError::shape(
                    GLOBAL_KEY,
                    format!("必须是映射，实际为 {}", kind(other)),
                ));
            }
        };

        Ok(RuleSet::new(parsed, globals))
    }
}

fn parse_target(name: &str, target: &Value) -> Result<TargetRules, ConfigurationError> {
    let path = format!("{}.{}", TARGETS_KEY, name);
    let target = target.as_object().ok_or_else(|| {
        ConfigurationError::shape(&path, format!("目标配置必须是映射，实际为 {}", kind(target)))
    })?;

    let empty = Map::new();
    let rules = match target.get(RULES_KEY) {
        None | Some(Value::Null) => &empty,
        Some(Value::Object(rules)) => rules,
        Some(other) => {
            return Err(ConfigurationError::shape(
                format!("{}.{}", path, RULES_KEY),
                format!("必须是映射，实际为 {}", kind(other)),
            ));
        }
    };

    let metadata = target
        .iter()
        .filter(|(key, _)| key.as_str() != RULES_KEY)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Ok(TargetRules::new(rules, metadata))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}
