//! HTTP 接口集成测试

use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use calculator::http::{AppState, router};
use calculator::{RuleSet, RuleStore};
use serde_json::{Value, json};
use tower::ServiceExt;

const RULES: &str = r#"
global:
  domain: sae.com
  base_dn: "dc=sae,dc=com"
targets:
  LDAP:
    rules:
      login: "{{ (firstname ~ '.' ~ lastname) | lower }}"
      mail: "{{ login }}@{{ global.domain }}"
      dn: "uid={{ login }},{{ global.base_dn }}"
    object_classes: [inetOrgPerson]
  SQL:
    rules:
      username: "{{ accountId }}"
      role: APP_USER
  BROKEN:
    rules:
      bad: "{{ firstname | shout }}"
"#;

fn create_test_app() -> (Router, RuleStore) {
    let store = RuleStore::new(RuleSet::from_yaml_str(RULES).unwrap());
    let app = router(AppState::new(store.clone(), "iam-gateway"), Duration::from_secs(5));
    (app, store)
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn post_calculate(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/calculate")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_root() {
    let (app, _) = create_test_app();
    let response = app.oneshot(get("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"status": "ok", "service": "iam-gateway"}));
}

#[tokio::test]
async fn test_health() {
    let (app, _) = create_test_app();
    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(
        body_json(response).await,
        json!({"status": "healthy", "calculator": "loaded", "targets": 3})
    );
}

#[tokio::test]
async fn test_request_id_is_propagated() {
    let (app, _) = create_test_app();
    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "midpoint-42")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-request-id"], "midpoint-42");
}

#[tokio::test]
async fn test_list_targets() {
    let (app, _) = create_test_app();
    let response = app.oneshot(get("/targets")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["targets"][0]["name"], "LDAP");
    assert_eq!(body["targets"][0]["attributes"], json!(["login", "mail", "dn"]));
    assert_eq!(body["targets"][0]["metadata"]["object_classes"], json!(["inetOrgPerson"]));
    assert_eq!(body["globals"], json!(["domain", "base_dn"]));
}

#[tokio::test]
async fn test_calculate() {
    let (app, _) = create_test_app();
    let response = app
        .oneshot(post_calculate(json!({
            "sourceAttributes": {"firstname": "Jean", "lastname": "Dupont"},
            "accountId": 1001,
            "targets": ["LDAP", "SQL", "GHOST"],
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({
            "LDAP": {
                "login": "jean.dupont",
                "mail": "jean.dupont@sae.com",
                "dn": "uid=jean.dupont,dc=sae,dc=com",
            },
            "SQL": {"username": 1001, "role": "APP_USER"},
        })
    );
}

#[tokio::test]
async fn test_calculate_template_error_returns_500() {
    let (app, _) = create_test_app();
    let response = app
        .oneshot(post_calculate(json!({
            "sourceAttributes": {"firstname": "Jean"},
            "accountId": "jdupont",
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "TEMPLATE_EVALUATION_ERROR");
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("BROKEN"));
    assert!(message.contains("bad"));
}

#[tokio::test]
async fn test_calculate_rejects_malformed_body() {
    let (app, _) = create_test_app();
    let response = app
        .oneshot(post_calculate(json!({"sourceAttributes": {}})))
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_calculate_sees_replaced_rules() {
    let (app, store) = create_test_app();
    store.replace(RuleSet::from_yaml_str("targets:\n  SQL:\n    rules:\n      role: APP_ADMIN\n").unwrap());

    let response = app
        .oneshot(post_calculate(json!({"accountId": 1})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"SQL": {"role": "APP_ADMIN"}}));
}
