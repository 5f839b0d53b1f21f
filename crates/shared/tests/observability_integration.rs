//! 可观测性模块集成测试
//!
//! 测试 metrics 记录函数和 HTTP 中间件。

// ============================================================================
// 指标记录测试
// ============================================================================

mod metrics_tests {
    use gateway_shared::observability::metrics::{
        record_calculation, record_http_request, record_rule_reload,
    };

    #[test]
    fn test_record_http_request() {
        record_http_request("GET", "/health", 200, 0.001);
        record_http_request("POST", "/calculate", 200, 0.004);
        record_http_request("POST", "/calculate", 500, 0.002);
        record_http_request("POST", "/calculate", 422, 0.0);
    }

    #[test]
    fn test_record_calculation() {
        record_calculation("success", 3, 0.0008);
        record_calculation("failed", 0, 0.0001);
    }

    #[test]
    fn test_record_rule_reload() {
        record_rule_reload(true, 3);
        record_rule_reload(false, 0);
    }
}

// ============================================================================
// 中间件测试
// ============================================================================

mod middleware_tests {
    use axum::{
        Extension, Router,
        body::Body,
        http::{Request, StatusCode},
        middleware,
        routing::get,
    };
    use gateway_shared::observability::middleware::{
        REQUEST_ID_HEADER, RequestId, http_tracing, request_id,
    };
    use tower::ServiceExt;

    async fn echo_request_id(Extension(id): Extension<RequestId>) -> String {
        id.0
    }

    fn app() -> Router {
        Router::new()
            .route("/echo", get(echo_request_id))
            .layer(middleware::from_fn(http_tracing))
            .layer(middleware::from_fn(request_id))
    }

    #[tokio::test]
    async fn test_upstream_request_id_is_kept() {
        let request = Request::builder()
            .uri("/echo")
            .header(REQUEST_ID_HEADER, "midpoint-7")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "midpoint-7");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"midpoint-7");
    }

    #[tokio::test]
    async fn test_missing_request_id_is_generated() {
        let request = Request::builder().uri("/echo").body(Body::empty()).unwrap();

        let response = app().oneshot(request).await.unwrap();

        let generated = response.headers()[REQUEST_ID_HEADER].to_str().unwrap();
        assert_eq!(generated.len(), 36);
    }

    #[test]
    fn test_request_id_clone() {
        let id = RequestId("abc".to_string());
        let cloned = id.clone();
        assert_eq!(id.0, cloned.0);
        assert!(format!("{:?}", cloned).contains("abc"));
    }
}

// ============================================================================
// 配置测试
// ============================================================================

mod config_tests {
    use gateway_shared::observability::ObservabilityConfig;

    #[test]
    fn test_deserialize_partial_config() {
        let config: ObservabilityConfig =
            serde_json::from_str(r#"{"json_logs": true, "metrics_port": 9464}"#).unwrap();

        assert!(config.json_logs);
        assert_eq!(config.metrics_port, 9464);
        assert_eq!(config.log_level, "info");
        assert!(!config.metrics_enabled);
    }

    #[test]
    fn test_guard_empty() {
        let _guard = gateway_shared::observability::ObservabilityGuard::empty();
    }
}
