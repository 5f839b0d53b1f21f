//! 供应请求与结果
//!
//! 上游身份治理系统发送的请求和返回给它的结果。计算器只负责
//! `calculatedAttributes`，其余字段由连接器编排层填写。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{AccountId, ComputedAttributes, EvaluationContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

/// 单个目标的处理状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetStatus {
    Success,
    Failed,
    Skipped,
}

/// 整体处理状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisionStatus {
    Success,
    PartialSuccess,
    Failed,
}

impl ProvisionStatus {
    /// 由各目标结果汇总整体状态，跳过的目标不参与统计
    pub fn aggregate(results: &[TargetResult]) -> Self {
        let (succeeded, failed) = results.iter().fold((0, 0), |(ok, ko), result| match result.status {
            TargetStatus::Success => (ok + 1, ko),
            TargetStatus::Failed => (ok, ko + 1),
            TargetStatus::Skipped => (ok, ko),
        });

        match (succeeded, failed) {
            (_, 0) => ProvisionStatus::Success,
            (0, _) => ProvisionStatus::Failed,
            _ => ProvisionStatus::PartialSuccess,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    pub operation: OperationType,
    pub target_systems: Vec<String>,
    pub account_id: AccountId,
    #[serde(default)]
    pub source_attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl ProvisionRequest {
    /// 转换为计算上下文，只计算请求中的目标系统
    pub fn to_context(&self) -> EvaluationContext {
        EvaluationContext::new(self.source_attributes.clone(), self.account_id.clone())
            .with_targets(self.target_systems.iter().cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetResult {
    pub target: String,
    pub operation: OperationType,
    pub status: TargetStatus,
    #[serde(default)]
    pub calculated_attributes: Map<String, Value>,
    pub message: String,
    #[serde(rename = "duration_ms")]
    pub duration_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TargetResult {
    pub fn success(target: impl Into<String>, operation: OperationType, attributes: Map<String, Value>) -> Self {
        Self {
            target: target.into(),
            operation,
            status: TargetStatus::Success,
            calculated_attributes: attributes,
            message: String::new(),
            duration_ms: 0.0,
            error: None,
        }
    }

    pub fn failed(target: impl Into<String>, operation: OperationType, error: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            operation,
            status: TargetStatus::Failed,
            calculated_attributes: Map::new(),
            message: String::new(),
            duration_ms: 0.0,
            error: Some(error.into()),
        }
    }

    pub fn skipped(target: impl Into<String>, operation: OperationType, message: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            operation,
            status: TargetStatus::Skipped,
            calculated_attributes: Map::new(),
            message: message.into(),
            duration_ms: 0.0,
            error: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionResult {
    pub status: ProvisionStatus,
    pub calculated_attributes: ComputedAttributes,
    pub target_results: Vec<TargetResult>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl ProvisionResult {
    /// 汇总各目标结果，状态由 [`ProvisionStatus::aggregate`] 得出
    pub fn from_targets(
        calculated_attributes: ComputedAttributes,
        target_results: Vec<TargetResult>,
        correlation_id: Option<String>,
    ) -> Self {
        let status = ProvisionStatus::aggregate(&target_results);
        let message = summary(status, &target_results);
        Self {
            status,
            calculated_attributes,
            target_results,
            message,
            timestamp: Utc::now(),
            correlation_id,
        }
    }
}

fn summary(status: ProvisionStatus, results: &[TargetResult]) -> String {
    let names = |wanted: TargetStatus| {
        results
            .iter()
            .filter(|r| r.status == wanted)
            .map(|r| r.target.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };

    match status {
        ProvisionStatus::Success if results.is_empty() => "No target to provision".to_string(),
        ProvisionStatus::Success => format!("Provisioning done in {}", names(TargetStatus::Success)),
        ProvisionStatus::PartialSuccess => format!(
            "Provisioning done in {}, failed in {}",
            names(TargetStatus::Success),
            names(TargetStatus::Failed)
        ),
        ProvisionStatus::Failed => format!("Provisioning failed in {}", names(TargetStatus::Failed)),
    }
}
