//! HTTP surface.
//!
//! `POST /{group}/{service}` takes a flat JSON object, `GET /{group}/{service}`
//! takes the same parameters as a query string. PUT, PATCH and DELETE take a
//! JSON body like POST, so a template can be called with its own method. Every outcome, including
//! malformed input and unknown routes, is answered with an [`ApiResponse`].

use crate::error::{ErrorCode, GatewayError};
use crate::gateway::Gateway;
use crate::openapi;
use crate::redact::redact;
use crate::response::ApiResponse;
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Build the router serving `gateway`.
pub fn build_app(gateway: Arc<Gateway>, body_limit: usize) -> Router {
    Router::new()
        .route("/api", get(api_document))
        .route("/health", get(health))
        .route(
            "/{group}/{service}",
            get(invoke_query)
                .post(invoke_body)
                .put(invoke_body)
                .patch(invoke_body)
                .delete(invoke_body),
        )
        .fallback(unknown_route)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(
            TraceLayer::new_for_http().on_response(
                |res: &axum::http::Response<_>, latency: Duration, _span: &tracing::Span| {
                    info!(
                        http.status = %res.status().as_u16(),
                        elapsed_ms = %latency.as_millis(),
                        "request handled"
                    );
                },
            ),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(gateway)
}

async fn api_document(State(gateway): State<Arc<Gateway>>) -> Json<Value> {
    Json(openapi::document(gateway.registry()))
}

async fn health(State(gateway): State<Arc<Gateway>>) -> Json<Value> {
    let stats = gateway.stats();
    Json(json!({
        "status": "ok",
        "services": gateway.registry().len(),
        "requestsProcessed": stats.requests_processed,
        "requestsFailed": stats.requests_failed,
    }))
}

async fn invoke_body(
    State(gateway): State<Arc<Gateway>>,
    Path((group, service)): Path<(String, String)>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let trace_id = Uuid::new_v4().to_string();

    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            let status = rejection.status();
            let err = GatewayError::InvalidRequest(rejection.body_text());
            warn!(trace_id = %trace_id, error = %err, "Rejected request body");
            return (status, Json(ApiResponse::error(&err, trace_id))).into_response();
        }
    };

    match parse_params(&body) {
        Ok(params) => respond(&gateway, group, service, params, headers, trace_id).await,
        Err(invalid) => invalid.into_envelope(trace_id),
    }
}

async fn invoke_query(
    State(gateway): State<Arc<Gateway>>,
    Path((group, service)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let trace_id = Uuid::new_v4().to_string();
    let params: HashMap<String, String> = query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    respond(&gateway, group, service, params, headers, trace_id).await
}

async fn unknown_route(uri: axum::http::Uri) -> Response {
    let trace_id = Uuid::new_v4().to_string();
    let err = GatewayError::InvalidRequest(format!("No route for {}", uri.path()));
    warn!(trace_id = %trace_id, path = %uri.path(), "Unknown route");
    (StatusCode::NOT_FOUND, Json(ApiResponse::error(&err, trace_id))).into_response()
}

/// A handler panicked; answer with the generic internal error envelope.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let trace_id = Uuid::new_v4().to_string();
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(trace_id = %trace_id, panic = %redact(detail), "Handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::failure(ErrorCode::InternalError, trace_id)),
    )
        .into_response()
}

async fn respond(
    gateway: &Gateway,
    group: String,
    service: String,
    params: HashMap<String, String>,
    headers: HeaderMap,
    trace_id: String,
) -> Response {
    let span = info_span!("call", trace_id = %trace_id, group = %group, service = %service);

    async move {
        match gateway.execute(&group, &service, &params, &headers).await {
            Ok(data) => {
                info!("Call completed");
                (StatusCode::OK, Json(ApiResponse::success(data, trace_id))).into_response()
            }
            Err(err) => {
                error!(
                    code = err.code().as_str(),
                    error = %redact(&err.to_string()),
                    "Call failed"
                );
                (err.status(), Json(ApiResponse::error(&err, trace_id))).into_response()
            }
        }
    }
    .instrument(span)
    .await
}

/// A request body that could not be turned into parameters.
#[derive(Debug)]
pub struct InvalidBody {
    pub message: String,
    pub field_errors: BTreeMap<String, String>,
}

impl InvalidBody {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field_errors: BTreeMap::new(),
        }
    }

    fn into_envelope(self, trace_id: String) -> Response {
        let err = GatewayError::InvalidRequest(self.message);
        warn!(trace_id = %trace_id, error = %err, "Rejected request body");
        let body = ApiResponse::error(&err, trace_id).with_field_errors(self.field_errors);
        (err.status(), Json(body)).into_response()
    }
}

/// Turn an inbound body into call parameters.
///
/// An empty body means no parameters. Otherwise the body must be a JSON
/// object of scalars; numbers and booleans are passed on as their text and
/// `null` counts as absent.
pub fn parse_params(body: &[u8]) -> Result<HashMap<String, String>, InvalidBody> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(HashMap::new());
    }

    let value: Value = serde_json::from_slice(body)
        .map_err(|e| InvalidBody::new(format!("Request body is not valid JSON: {}", e)))?;
    let Value::Object(fields) = value else {
        return Err(InvalidBody::new("Request body must be a JSON object"));
    };

    let mut params = HashMap::with_capacity(fields.len());
    let mut field_errors = BTreeMap::new();
    for (name, value) in fields {
        match value {
            Value::String(s) => {
                params.insert(name, s);
            }
            Value::Number(n) => {
                params.insert(name, n.to_string());
            }
            Value::Bool(b) => {
                params.insert(name, b.to_string());
            }
            Value::Null => {}
            Value::Array(_) | Value::Object(_) => {
                field_errors.insert(name, "must be a string, number or boolean".to_string());
            }
        }
    }

    if !field_errors.is_empty() {
        return Err(InvalidBody {
            message: "Request fields must be scalar values".to_string(),
            field_errors,
        });
    }
    Ok(params)
}
