//! XML response normalization.
//!
//! Uses quick-xml, which never expands entities or fetches DTDs. Documents
//! carrying a DOCTYPE are rejected outright, and references to anything but
//! the predefined XML entities fail to unescape.
//!
//! The element tree maps onto JSON as follows: namespace prefixes are
//! dropped, attributes become fields, repeated siblings become arrays, an
//! element with only text becomes a string, and text mixed with child
//! elements or attributes is kept under the empty key.

use crate::error::GatewayError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

/// Maximum element nesting accepted in a response.
pub const MAX_DEPTH: usize = 128;

/// Parse a SOAP response and return the content of its `Body` element.
///
/// A `Fault` directly under the Body is reported as [`GatewayError::Fault`].
pub fn to_structured(data: &[u8]) -> Result<Value, GatewayError> {
    let xml = std::str::from_utf8(data)
        .map_err(|e| GatewayError::MalformedResponse(format!("Invalid UTF-8: {}", e)))?;
    let document = parse_document(xml)?;
    let body = extract_body(document)?;

    if let Some(fault) = body.as_object().and_then(|b| b.get("Fault")) {
        return Err(GatewayError::Fault(fault_message(fault)));
    }
    Ok(body)
}

/// Parse an XML document into `{root-name: value}`.
pub fn parse_document(xml: &str) -> Result<Map<String, Value>, GatewayError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack = vec![Frame::default()];

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                if stack.len() > MAX_DEPTH {
                    return Err(GatewayError::MalformedResponse(format!(
                        "Element nesting exceeds {} levels",
                        MAX_DEPTH
                    )));
                }
                stack.push(Frame::open(e)?);
            }

            Ok(Event::Empty(ref e)) => {
                let frame = Frame::open(e)?;
                attach(&mut stack, frame)?;
            }

            Ok(Event::End(_)) => {
                let frame = stack.pop().ok_or_else(unbalanced)?;
                attach(&mut stack, frame)?;
            }

            Ok(Event::Text(ref e)) => {
                let text = e.unescape().map_err(|e| {
                    GatewayError::MalformedResponse(format!("Invalid text content: {}", e))
                })?;
                current(&mut stack)?.text.push_str(&text);
            }

            Ok(Event::CData(ref e)) => {
                let text = std::str::from_utf8(e).map_err(|e| {
                    GatewayError::MalformedResponse(format!("Invalid CDATA content: {}", e))
                })?;
                current(&mut stack)?.text.push_str(text);
            }

            Ok(Event::DocType(_)) => {
                return Err(GatewayError::MalformedResponse(
                    "DOCTYPE declarations are not allowed".to_string(),
                ));
            }

            Ok(Event::Eof) => break,

            Err(e) => {
                return Err(GatewayError::MalformedResponse(format!("XML parse error: {}", e)));
            }

            // Declarations, comments and processing instructions carry no data.
            Ok(_) => {}
        }
    }

    if stack.len() != 1 {
        return Err(unbalanced());
    }
    let root = stack.pop().ok_or_else(unbalanced)?;
    if root.fields.is_empty() {
        return Err(GatewayError::MalformedResponse("Empty document".to_string()));
    }
    Ok(root.fields)
}

fn extract_body(document: Map<String, Value>) -> Result<Value, GatewayError> {
    let envelope = document
        .into_iter()
        .next()
        .map(|(_, value)| value)
        .ok_or_else(|| GatewayError::MalformedResponse("Empty document".to_string()))?;

    let body = match envelope {
        Value::Object(mut fields) => fields.remove("Body"),
        _ => None,
    }
    .ok_or_else(|| GatewayError::MalformedResponse("Response has no Body element".to_string()))?;

    Ok(match body {
        Value::String(text) if text.is_empty() => Value::Object(Map::new()),
        other => other,
    })
}

fn fault_message(fault: &Value) -> String {
    let field = |names: &[&str]| {
        names
            .iter()
            .find_map(|name| fault.get(*name).and_then(leaf_text))
    };

    // SOAP 1.1 faultstring, SOAP 1.2 Reason/Text
    field(&["faultstring"])
        .or_else(|| fault.get("Reason").and_then(|r| r.get("Text")).and_then(leaf_text))
        .or_else(|| field(&["faultcode", "Code"]))
        .unwrap_or_else(|| "SOAP fault".to_string())
}

fn leaf_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(fields) => fields.get("").and_then(leaf_text),
        _ => None,
    }
}

/// An element being assembled.
#[derive(Debug, Default)]
struct Frame {
    name: String,
    fields: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(e: &BytesStart) -> Result<Self, GatewayError> {
        let mut frame = Frame {
            name: local_name_str(e.local_name().as_ref())?,
            ..Default::default()
        };

        for attr in e.attributes() {
            let attr = attr.map_err(|e| {
                GatewayError::MalformedResponse(format!("Invalid attribute: {}", e))
            })?;
            let key = attr.key.as_ref();
            if key == b"xmlns" || key.starts_with(b"xmlns:") {
                continue;
            }
            let name = local_name_str(attr.key.local_name().as_ref())?;
            let value = attr.unescape_value().map_err(|e| {
                GatewayError::MalformedResponse(format!("Invalid attribute value: {}", e))
            })?;
            insert_child(&mut frame.fields, name, Value::String(value.into_owned()));
        }

        Ok(frame)
    }

    fn into_value(self) -> Value {
        let text = self.text.trim();
        if self.fields.is_empty() {
            return Value::String(text.to_string());
        }

        let mut fields = self.fields;
        if !text.is_empty() {
            insert_child(&mut fields, String::new(), Value::String(text.to_string()));
        }
        Value::Object(fields)
    }
}

fn attach(stack: &mut [Frame], frame: Frame) -> Result<(), GatewayError> {
    let name = frame.name.clone();
    let value = frame.into_value();
    insert_child(&mut current(stack)?.fields, name, value);
    Ok(())
}

fn current(stack: &mut [Frame]) -> Result<&mut Frame, GatewayError> {
    stack.last_mut().ok_or_else(unbalanced)
}

/// Insert a child; a repeated name turns the field into an array.
fn insert_child(fields: &mut Map<String, Value>, name: String, value: Value) {
    match fields.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            fields.insert(name, value);
        }
    }
}

fn local_name_str(name: &[u8]) -> Result<String, GatewayError> {
    std::str::from_utf8(name)
        .map(str::to_string)
        .map_err(|e| GatewayError::MalformedResponse(format!("Invalid element name: {}", e)))
}

fn unbalanced() -> GatewayError {
    GatewayError::MalformedResponse("Unbalanced element structure".to_string())
}
