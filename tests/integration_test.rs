//! Integration tests for the xtr-gateway crate.
//!
//! These tests drive the HTTP router end-to-end: template loading, rendering,
//! dispatch to a mocked security server, XML normalization and field
//! filtering against a mocked policy source.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{body_string, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use xtr_gateway::server::build_app;
use xtr_gateway::{Gateway, GatewayConfig, TemplateRegistry};

// ============================================================================
// Helpers
// ============================================================================

const PERSON_TEMPLATE: &str = r#"
params: [idCode]
service: ""
method: POST
envelope: "<req>{{idCode}}</req>"
"#;

const PERSON_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/">
  <SOAP-ENV:Header/>
  <SOAP-ENV:Body>
    <name>Jane</name>
    <idCode>38001010000</idCode>
    <extra>x</extra>
  </SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#;

fn write_template(root: &Path, group: &str, service: &str, yaml: &str) {
    let dir = root.join(group);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{}.yml", service)), yaml).unwrap();
}

fn config(security_server: &str, policy: &str, templates: &Path) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.security_server.url = security_server.to_string();
    config.security_server.timeout_secs = 5;
    config.policy.base_url = policy.to_string();
    config.templates.root = templates.to_path_buf();
    config
}

fn app(config: &GatewayConfig) -> Router {
    config.validate().unwrap();
    let registry = TemplateRegistry::load(&config.templates).unwrap();
    let gateway = Arc::new(Gateway::new(config, registry).unwrap());
    build_app(gateway, config.server.body_limit_bytes)
}

async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn assert_trace_id(envelope: &Value) {
    let trace_id = envelope["traceId"].as_str().expect("traceId");
    assert!(uuid::Uuid::parse_str(trace_id).is_ok(), "not a uuid: {}", trace_id);
}

/// A port nothing is listening on.
fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

// ============================================================================
// Call path
// ============================================================================

#[tokio::test]
async fn test_security_server_call_renders_declared_params() {
    let upstream = MockServer::start().await;
    let policy = MockServer::start().await;
    let templates = TempDir::new().unwrap();
    write_template(templates.path(), "rr", "person", PERSON_TEMPLATE);

    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_string("<req>38001010000</req>"))
        .and(header("content-type", "text/xml; charset=utf-8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PERSON_RESPONSE))
        .expect(1)
        .mount(&upstream)
        .await;

    let app = app(&config(&upstream.uri(), &policy.uri(), templates.path()));
    let (status, envelope) = call(
        app,
        post("/rr/person", r#"{"idCode":"38001010000","injected":"<evil/>"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["success"], json!(true));
    assert_eq!(
        envelope["data"],
        json!({"name": "Jane", "idCode": "38001010000", "extra": "x"})
    );
    assert!(envelope.get("error").is_none());
    assert_trace_id(&envelope);
}

#[tokio::test]
async fn test_policy_selects_and_masks_fields() {
    let upstream = MockServer::start().await;
    let policy = MockServer::start().await;
    let templates = TempDir::new().unwrap();
    write_template(templates.path(), "rr", "person", PERSON_TEMPLATE);

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PERSON_RESPONSE))
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/config/service/person/filter"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "selected_fields": ["name"],
            "sensitive_fields": ["idCode"]
        })))
        .expect(1)
        .mount(&policy)
        .await;

    let app = app(&config(&upstream.uri(), &policy.uri(), templates.path()));
    let (status, envelope) = call(app, post("/rr/person", r#"{"idCode":"38001010000"}"#)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["data"], json!({"name": "Jane"}));
}

#[tokio::test]
async fn test_sensitive_selected_field_masked() {
    let upstream = MockServer::start().await;
    let policy = MockServer::start().await;
    let templates = TempDir::new().unwrap();
    write_template(templates.path(), "rr", "person", PERSON_TEMPLATE);

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PERSON_RESPONSE))
        .mount(&upstream)
        .await;
    Mock::given(path("/api/config/service/person/filter"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "selected_fields": [],
            "sensitive_fields": ["idCode"]
        })))
        .mount(&policy)
        .await;

    let app = app(&config(&upstream.uri(), &policy.uri(), templates.path()));
    let (_, envelope) = call(app, post("/rr/person", r#"{"idCode":"38001010000"}"#)).await;

    assert_eq!(
        envelope["data"],
        json!({"name": "Jane", "idCode": "[SENSITIVE_DATA_MASKED]", "extra": "x"})
    );
}

#[tokio::test]
async fn test_policy_source_down_returns_unfiltered() {
    let upstream = MockServer::start().await;
    let templates = TempDir::new().unwrap();
    write_template(templates.path(), "rr", "person", PERSON_TEMPLATE);

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PERSON_RESPONSE))
        .mount(&upstream)
        .await;

    let app = app(&config(&upstream.uri(), &closed_port_url(), templates.path()));
    let (status, envelope) = call(app, post("/rr/person", r#"{"idCode":"38001010000"}"#)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["data"]["extra"], json!("x"));
}

#[tokio::test]
async fn test_direct_route_sends_template_and_forwarded_headers() {
    let direct = MockServer::start().await;
    let policy = MockServer::start().await;
    let templates = TempDir::new().unwrap();
    write_template(
        templates.path(),
        "ehis",
        "status",
        &format!(
            r#"
params: [id]
service: "{}/status"
method: GET
envelope: "<q>{{{{id}}}}</q>"
headers:
  SOAPAction: GetStatus
"#,
            direct.uri()
        ),
    );

    Mock::given(method("GET"))
        .and(path("/status"))
        .and(header("soapaction", "GetStatus"))
        .and(header("x-request-id", "r-42"))
        .and(body_string_contains("<q>7</q>"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<Envelope><Body><status>OK</status></Body></Envelope>"),
        )
        .expect(1)
        .mount(&direct)
        .await;

    // The security server is unreachable; a direct template must not use it.
    let mut config = config(&closed_port_url(), &policy.uri(), templates.path());
    config.forwarding.headers = vec!["X-Request-Id".to_string()];

    let request = Request::builder()
        .uri("/ehis/status?id=7")
        .header("x-request-id", "r-42")
        .header("x-not-forwarded", "1")
        .body(Body::empty())
        .unwrap();
    let (status, envelope) = call(app(&config), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["data"], json!({"status": "OK"}));
}

#[tokio::test]
async fn test_put_template_called_with_its_own_method() {
    let direct = MockServer::start().await;
    let policy = MockServer::start().await;
    let templates = TempDir::new().unwrap();
    write_template(
        templates.path(),
        "ehis",
        "update",
        &format!(
            "params: [id]\nservice: \"{}/update\"\nmethod: PUT\nenvelope: \"<u>{{{{id}}}}</u>\"\n",
            direct.uri()
        ),
    );

    Mock::given(method("PUT"))
        .and(path("/update"))
        .and(body_string("<u>9</u>"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<Envelope><Body><updated>true</updated></Body></Envelope>"),
        )
        .expect(2)
        .mount(&direct)
        .await;

    let config = config(&closed_port_url(), &policy.uri(), templates.path());
    let request = Request::builder()
        .method("PUT")
        .uri("/ehis/update")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"id":"9"}"#))
        .unwrap();
    let (status, envelope) = call(app(&config), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["data"], json!({"updated": "true"}));

    // POST still serves every template.
    let (status, _) = call(app(&config), post("/ehis/update", r#"{"id":"9"}"#)).await;
    assert_eq!(status, StatusCode::OK);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_connection_refused_is_connection_error() {
    let policy = MockServer::start().await;
    let templates = TempDir::new().unwrap();
    write_template(templates.path(), "rr", "person", PERSON_TEMPLATE);

    let app = app(&config(&closed_port_url(), &policy.uri(), templates.path()));
    let (status, envelope) = call(app, post("/rr/person", r#"{"idCode":"38001010000"}"#)).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(envelope["success"], json!(false));
    assert_eq!(envelope["error"]["code"], json!("CONNECTION_ERROR"));
    assert!(envelope.get("data").is_none());
    assert_trace_id(&envelope);
}

#[tokio::test]
async fn test_tls_handshake_failure_is_ssl_error() {
    let plain = MockServer::start().await;
    let policy = MockServer::start().await;
    let templates = TempDir::new().unwrap();
    let https_uri = plain.uri().replacen("http://", "https://", 1);
    write_template(
        templates.path(),
        "ehis",
        "status",
        &format!("service: \"{}/status\"\nmethod: POST\nenvelope: \"<q/>\"\n", https_uri),
    );

    let app = app(&config(&closed_port_url(), &policy.uri(), templates.path()));
    let (status, envelope) = call(app, post("/ehis/status", "")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(envelope["success"], json!(false));
    assert_eq!(envelope["error"]["code"], json!("SSL_ERROR"));
    assert_trace_id(&envelope);
}

#[tokio::test]
async fn test_upstream_error_status_is_xroad_error() {
    let upstream = MockServer::start().await;
    let policy = MockServer::start().await;
    let templates = TempDir::new().unwrap();
    write_template(templates.path(), "rr", "person", PERSON_TEMPLATE);

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom at 38001010000"))
        .mount(&upstream)
        .await;

    let app = app(&config(&upstream.uri(), &policy.uri(), templates.path()));
    let (status, envelope) = call(app, post("/rr/person", r#"{"idCode":"38001010000"}"#)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(envelope["error"]["code"], json!("XROAD_ERROR"));
    assert!(!envelope.to_string().contains("boom"));
}

#[tokio::test]
async fn test_garbled_upstream_response_is_xroad_error() {
    let upstream = MockServer::start().await;
    let policy = MockServer::start().await;
    let templates = TempDir::new().unwrap();
    write_template(templates.path(), "rr", "person", PERSON_TEMPLATE);

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance"))
        .mount(&upstream)
        .await;

    let app = app(&config(&upstream.uri(), &policy.uri(), templates.path()));
    let (status, envelope) = call(app, post("/rr/person", r#"{"idCode":"1"}"#)).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(envelope["error"]["code"], json!("XROAD_ERROR"));
}

#[tokio::test]
async fn test_soap_fault_is_xroad_error_with_reason() {
    let upstream = MockServer::start().await;
    let policy = MockServer::start().await;
    let templates = TempDir::new().unwrap();
    write_template(templates.path(), "rr", "person", PERSON_TEMPLATE);

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<Envelope><Body><Fault><faultcode>Server</faultcode>\
             <faultstring>Service unavailable</faultstring></Fault></Body></Envelope>",
        ))
        .mount(&upstream)
        .await;

    let app = app(&config(&upstream.uri(), &policy.uri(), templates.path()));
    let (status, envelope) = call(app, post("/rr/person", r#"{"idCode":"1"}"#)).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(envelope["error"]["code"], json!("XROAD_ERROR"));
    assert_eq!(envelope["error"]["details"], json!("Service unavailable"));
}

#[tokio::test]
async fn test_unknown_service_is_invalid_request() {
    let templates = TempDir::new().unwrap();
    let app = app(&config(&closed_port_url(), &closed_port_url(), templates.path()));

    let (status, envelope) = call(app.clone(), post("/rr/missing", "{}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(envelope["error"]["code"], json!("INVALID_REQUEST"));
    assert_trace_id(&envelope);

    let (status, envelope) = call(app, post("/too/many/segments", "{}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(envelope["error"]["code"], json!("INVALID_REQUEST"));
}

#[tokio::test]
async fn test_missing_param_is_invalid_request_without_upstream_call() {
    let upstream = MockServer::start().await;
    let templates = TempDir::new().unwrap();
    write_template(templates.path(), "rr", "person", PERSON_TEMPLATE);

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PERSON_RESPONSE))
        .expect(0)
        .mount(&upstream)
        .await;

    let app = app(&config(&upstream.uri(), &closed_port_url(), templates.path()));
    let (status, envelope) = call(app, post("/rr/person", "")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(envelope["error"]["code"], json!("INVALID_REQUEST"));
}

#[tokio::test]
async fn test_nested_body_rejected_with_field_errors() {
    let templates = TempDir::new().unwrap();
    write_template(templates.path(), "rr", "person", PERSON_TEMPLATE);
    let app = app(&config(&closed_port_url(), &closed_port_url(), templates.path()));

    let (status, envelope) =
        call(app, post("/rr/person", r#"{"idCode":{"nested":true}}"#)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(envelope["error"]["code"], json!("INVALID_REQUEST"));
    assert!(envelope["error"]["fieldErrors"]["idCode"].is_string());
}

// ============================================================================
// Startup and auxiliary endpoints
// ============================================================================

#[tokio::test]
async fn test_api_document_and_health() {
    let templates = TempDir::new().unwrap();
    write_template(templates.path(), "rr", "person", PERSON_TEMPLATE);
    write_template(templates.path(), "Ruuter.public", "hidden", PERSON_TEMPLATE);
    let app = app(&config(&closed_port_url(), &closed_port_url(), templates.path()));

    let (status, doc) = call(app.clone(), get("/api")).await;
    assert_eq!(status, StatusCode::OK);
    let paths = doc["paths"].as_object().unwrap();
    assert_eq!(paths.keys().collect::<Vec<_>>(), vec!["/rr/person"]);
    assert!(doc["paths"]["/rr/person"]["post"]["requestBody"].is_object());

    let (status, health) = call(app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], json!("ok"));
    assert_eq!(health["services"], json!(1));
}

#[test]
fn test_malformed_template_aborts_load() {
    let templates = TempDir::new().unwrap();
    write_template(templates.path(), "rr", "person", PERSON_TEMPLATE);
    write_template(templates.path(), "rr", "broken", "params: [a\nmethod: POST\n");

    let config = config("http://localhost:1", "http://localhost:2", templates.path());
    assert!(TemplateRegistry::load(&config.templates).is_err());
}

#[test]
fn test_remote_template_source_refused() {
    let templates = TempDir::new().unwrap();
    let mut config = config("http://localhost:1", "http://localhost:2", templates.path());
    config.templates.remote_source = Some("http://admin:8000/templates".to_string());
    assert!(matches!(
        TemplateRegistry::load(&config.templates),
        Err(xtr_gateway::GatewayError::RemoteSourceDisabled(_))
    ));
}
