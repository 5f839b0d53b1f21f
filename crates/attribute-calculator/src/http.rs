//! HTTP 接口
//!
//! - `GET /` 服务信息
//! - `GET /health` 健康检查
//! - `GET /targets` 已配置的目标系统
//! - `POST /calculate` 计算目标系统属性

use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use gateway_shared::observability::{metrics, middleware as obs_middleware};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tower_http::timeout::TimeoutLayer;
use tracing::{info, instrument};

use crate::error::CalculatorError;
use crate::models::{ComputedAttributes, EvaluationContext};
use crate::store::RuleStore;

/// HTTP 层错误
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("计算失败: {0}")]
    Calculation(#[from] CalculatorError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Calculation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Calculation(CalculatorError::TemplateEvaluation { .. }) => "TEMPLATE_EVALUATION_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // message 中带有出错的目标和属性名
        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": self.to_string(),
            "data": Value::Null
        });

        (self.status_code(), Json(body)).into_response()
    }
}

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub store: RuleStore,
    pub service_name: String,
}

impl AppState {
    pub fn new(store: RuleStore, service_name: impl Into<String>) -> Self {
        Self {
            store,
            service_name: service_name.into(),
        }
    }
}

/// 构建应用路由
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/targets", get(list_targets))
        .route("/calculate", post(calculate))
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout))
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}

async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": state.service_name
    }))
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "calculator": "loaded",
        "targets": state.store.load().target_count()
    }))
}

#[derive(Debug, Serialize)]
struct TargetSummary {
    name: String,
    attributes: Vec<String>,
    metadata: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct TargetsResponse {
    targets: Vec<TargetSummary>,
    globals: Vec<String>,
}

async fn list_targets(State(state): State<AppState>) -> Json<TargetsResponse> {
    let rules = state.store.load();
    let targets = rules
        .targets()
        .map(|(name, target)| TargetSummary {
            name: name.to_string(),
            attributes: target.attribute_names().map(str::to_string).collect(),
            metadata: target.metadata().clone(),
        })
        .collect();

    Json(TargetsResponse {
        targets,
        globals: rules.globals().keys().cloned().collect(),
    })
}

#[instrument(skip_all, fields(account_id = %request.account_id))]
async fn calculate(
    State(state): State<AppState>,
    Json(request): Json<EvaluationContext>,
) -> Result<Json<ComputedAttributes>, ApiError> {
    let started = Instant::now();
    let result = state.store.calculator().evaluate(&request);
    let elapsed = started.elapsed();

    match result {
        Ok(attributes) => {
            metrics::record_calculation("success", attributes.len(), elapsed.as_secs_f64());
            info!(
                targets = attributes.len(),
                elapsed_us = elapsed.as_micros() as u64,
                "属性计算完成"
            );
            Ok(Json(attributes))
        }
        Err(e) => {
            metrics::record_calculation("failed", 0, elapsed.as_secs_f64());
            tracing::error!(error = %e, "属性计算失败");
            Err(e.into())
        }
    }
}
