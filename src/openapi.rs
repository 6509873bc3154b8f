//! API description served at `GET /api`.
//!
//! Every template parameter is a string, so the document is derived from the
//! registry alone. Each path is listed under its template's own method; POST
//! is accepted for every template as well.

use crate::registry::TemplateRegistry;
use crate::template::{HttpMethod, Template};
use serde_json::{json, Map, Value};

/// Build an OpenAPI 3.0 document with one path per registered template.
pub fn document(registry: &TemplateRegistry) -> Value {
    let mut paths = Map::new();
    for (group, service, template) in registry.iter() {
        let operation = operation(group, service, template);
        let mut item = Map::new();
        item.insert(template.method().as_str().to_ascii_lowercase(), operation);
        paths.insert(format!("/{}/{}", group, service), Value::Object(item));
    }

    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "X-Road Template Gateway",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "paths": paths,
        "components": {
            "schemas": {
                "ApiResponse": response_schema(),
            }
        }
    })
}

fn operation(group: &str, service: &str, template: &Template) -> Value {
    let mut operation = json!({
        "operationId": format!("{}_{}", group, service),
        "tags": [group],
        "summary": format!("{} {}", template.method(), service),
        "responses": {
            "200": response_ref("Service response"),
            "default": response_ref("Gateway error"),
        }
    });

    if template.method() == HttpMethod::Get {
        let parameters: Vec<Value> = template
            .params()
            .iter()
            .map(|name| {
                json!({
                    "name": name,
                    "in": "query",
                    "required": false,
                    "schema": {"type": "string"},
                })
            })
            .collect();
        operation["parameters"] = Value::Array(parameters);
    } else {
        let properties: Map<String, Value> = template
            .params()
            .iter()
            .map(|name| (name.clone(), json!({"type": "string"})))
            .collect();
        operation["requestBody"] = json!({
            "required": false,
            "content": {
                "application/json": {
                    "schema": {"type": "object", "properties": properties},
                }
            }
        });
    }
    operation
}

fn response_ref(description: &str) -> Value {
    json!({
        "description": description,
        "content": {
            "application/json": {
                "schema": {"$ref": "#/components/schemas/ApiResponse"},
            }
        }
    })
}

fn response_schema() -> Value {
    json!({
        "type": "object",
        "required": ["success", "timestamp", "traceId"],
        "properties": {
            "success": {"type": "boolean"},
            "data": {},
            "error": {
                "type": "object",
                "required": ["code", "message"],
                "properties": {
                    "code": {
                        "type": "string",
                        "enum": [
                            "SSL_ERROR",
                            "CONNECTION_ERROR",
                            "XROAD_ERROR",
                            "INVALID_REQUEST",
                            "INTERNAL_ERROR"
                        ],
                    },
                    "message": {"type": "string"},
                    "details": {"type": "string"},
                    "fieldErrors": {
                        "type": "object",
                        "additionalProperties": {"type": "string"},
                    },
                }
            },
            "timestamp": {"type": "string", "format": "date-time"},
            "traceId": {"type": "string"},
        }
    })
}
