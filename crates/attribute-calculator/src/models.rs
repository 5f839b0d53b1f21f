//! 规则集与计算上下文

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::formula::Formula;

/// 单个目标系统的计算结果：属性名 → 值
pub type TargetAttributes = Map<String, Value>;

/// 计算结果：目标名 → 属性映射，按规则集中的目标顺序排列
pub type ComputedAttributes = IndexMap<String, TargetAttributes>;

/// 单个目标系统的规则
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetRules {
    rules: IndexMap<String, Formula>,
    /// 除 `rules` 外的其他配置，引擎不解释
    metadata: Map<String, Value>,
}

impl TargetRules {
    pub fn new(rules: &Map<String, Value>, metadata: Map<String, Value>) -> Self {
        Self {
            rules: rules
                .iter()
                .map(|(name, formula)| (name.clone(), Formula::compile(formula)))
                .collect(),
            metadata,
        }
    }

    pub fn rules(&self) -> &IndexMap<String, Formula> {
        &self.rules
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// 已校验的规则集，构建后只读
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    targets: IndexMap<String, TargetRules>,
    globals: Map<String, Value>,
}

impl RuleSet {
    pub fn new(targets: IndexMap<String, TargetRules>, globals: Map<String, Value>) -> Self {
        Self { targets, globals }
    }

    pub fn target(&self, name: &str) -> Option<&TargetRules> {
        self.targets.get(name)
    }

    pub fn targets(&self) -> impl Iterator<Item = (&str, &TargetRules)> {
        self.targets.iter().map(|(name, rules)| (name.as_str(), rules))
    }

    pub fn target_names(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn globals(&self) -> &Map<String, Value> {
        &self.globals
    }
}

/// 账号标识，上游可能传字符串或整数
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccountId {
    Number(i64),
    Text(String),
}

impl AccountId {
    /// 模板中看到的值，保留原始类型
    pub fn to_value(&self) -> Value {
        match self {
            AccountId::Number(n) => Value::from(*n),
            AccountId::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountId::Number(n) => write!(f, "{}", n),
            AccountId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for AccountId {
    fn from(value: i64) -> Self {
        AccountId::Number(value)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        AccountId::Text(value.to_string())
    }
}

impl From<String> for AccountId {
    fn from(value: String) -> Self {
        AccountId::Text(value)
    }
}

/// 单次计算的输入，每次调用新建
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    #[serde(default)]
    pub source_attributes: Map<String, Value>,
    pub account_id: AccountId,
    /// 为空时计算所有目标
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,
}

impl EvaluationContext {
    pub fn new(source_attributes: Map<String, Value>, account_id: impl Into<AccountId>) -> Self {
        Self {
            source_attributes,
            account_id: account_id.into(),
            targets: None,
        }
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = Some(targets.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.source_attributes.insert(name.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_account_id_accepts_string_or_number() {
        let numeric: AccountId = serde_json::from_value(json!(1001)).unwrap();
        assert_eq!(numeric, AccountId::Number(1001));
        assert_eq!(numeric.to_value(), json!(1001));

        let text: AccountId = serde_json::from_value(json!("A-1001")).unwrap();
        assert_eq!(text, AccountId::Text("A-1001".into()));
        assert_eq!(text.to_string(), "A-1001");
    }

    #[test]
    fn test_context_deserializes_camel_case() {
        let ctx: EvaluationContext = serde_json::from_value(json!({
            "sourceAttributes": {"firstname": "Jean"},
            "accountId": "1001",
            "targets": ["LDAP"],
        }))
        .unwrap();

        assert_eq!(ctx.source_attributes["firstname"], json!("Jean"));
        assert_eq!(ctx.account_id, AccountId::from("1001"));
        assert_eq!(ctx.targets, Some(vec!["LDAP".to_string()]));
    }

    #[test]
    fn test_context_defaults() {
        let ctx: EvaluationContext = serde_json::from_value(json!({"accountId": 7})).unwrap();
        assert!(ctx.source_attributes.is_empty());
        assert!(ctx.targets.is_none());
    }

    #[test]
    fn test_context_builder() {
        let ctx = EvaluationContext::new(Map::new(), 42_i64)
            .with_attribute("firstname", "Jean")
            .with_targets(["SQL"]);
        assert_eq!(ctx.source_attributes["firstname"], json!("Jean"));
        assert_eq!(ctx.targets.as_deref(), Some(&["SQL".to_string()][..]));
    }

    #[test]
    fn test_target_rules_keep_order_and_metadata() {
        let rules = match json!({"login": "{{ a }}", "cn": "x", "active": true}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let mut metadata = Map::new();
        metadata.insert("object_classes".into(), json!(["inetOrgPerson"]));

        let target = TargetRules::new(&rules, metadata);
        assert_eq!(target.attribute_names().collect::<Vec<_>>(), ["login", "cn", "active"]);
        assert_eq!(target.metadata()["object_classes"], json!(["inetOrgPerson"]));
        assert!(!target.is_empty());
    }
}
