//! The outward-facing response envelope.

use crate::error::{ErrorCode, GatewayError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Success or failure wrapper returned for every call.
///
/// Exactly one of `data` and `error` is set; the constructors are the only
/// way to build one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorDetails>,

    timestamp: DateTime<Utc>,

    trace_id: String,
}

/// Error body of a failed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_errors: Option<BTreeMap<String, String>>,
}

impl ApiResponse {
    pub fn success(data: Value, trace_id: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
            trace_id: trace_id.into(),
        }
    }

    /// Failure envelope for `err`. Only caller-safe detail is included.
    pub fn error(err: &GatewayError, trace_id: impl Into<String>) -> Self {
        let mut response = Self::failure(err.code(), trace_id);
        if let Some(error) = response.error.as_mut() {
            error.details = err.public_details();
        }
        response
    }

    /// Failure envelope carrying only the fixed message for `code`.
    pub fn failure(code: ErrorCode, trace_id: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorDetails {
                code: code.as_str().to_string(),
                message: code.public_message().to_string(),
                details: None,
                field_errors: None,
            }),
            timestamp: Utc::now(),
            trace_id: trace_id.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn error_details(&self) -> Option<&ErrorDetails> {
        self.error.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Attach per-field validation messages to a failure envelope.
    pub fn with_field_errors(mut self, field_errors: BTreeMap<String, String>) -> Self {
        if let Some(error) = self.error.as_mut() {
            if !field_errors.is_empty() {
                error.field_errors = Some(field_errors);
            }
        }
        self
    }
}
