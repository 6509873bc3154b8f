//! Request templates.
//!
//! A template is one YAML file declaring the parameters it accepts, an
//! optional direct service URI, the HTTP method, static headers and the
//! envelope body with `{{name}}` placeholders:
//!
//! ```yaml
//! params: [idCode]
//! service: ""            # empty or absent: route via the security server
//! method: POST
//! headers:
//!   SOAPAction: "ettevottegaSeotudIsikud_v1"
//! envelope: |
//!   <soapenv:Envelope ...>
//!     <soapenv:Header>{{{generate_client}}}</soapenv:Header>
//!     <soapenv:Body><req>{{idCode}}</req></soapenv:Body>
//!   </soapenv:Envelope>
//! ```

use crate::error::GatewayError;
use crate::render::BUILTIN_VARIABLES;
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// HTTP methods a template may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl FromStr for HttpMethod {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(GatewayError::Template(format!("Unsupported HTTP method '{}'", other))),
        }
    }
}

impl TryFrom<String> for HttpMethod {
    type Error = GatewayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HttpMethod> for String {
    fn from(method: HttpMethod) -> Self {
        method.as_str().to_string()
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// On-disk shape of a template file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TemplateDefinition {
    #[serde(default)]
    params: Vec<String>,
    #[serde(default)]
    service: Option<String>,
    method: HttpMethod,
    envelope: String,
    #[serde(default)]
    headers: Option<BTreeMap<String, String>>,
}

/// A loaded request template. Immutable once built.
#[derive(Debug, Clone)]
pub struct Template {
    params: Vec<String>,
    service_uri: Option<String>,
    method: HttpMethod,
    envelope: String,
    headers: BTreeMap<String, String>,
}

impl Template {
    /// Parse a YAML template definition and check its envelope syntax.
    pub fn from_yaml(content: &str) -> Result<Self, GatewayError> {
        let definition: TemplateDefinition = serde_yaml::from_str(content)
            .map_err(|e| GatewayError::Template(e.to_string()))?;

        let mut params = Vec::with_capacity(definition.params.len());
        for name in definition.params {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(GatewayError::Template("Empty parameter name".to_string()));
            }
            if !params.contains(&name) {
                params.push(name);
            }
        }

        let template = Self {
            params,
            service_uri: definition
                .service
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            method: definition.method,
            envelope: definition.envelope,
            headers: definition.headers.unwrap_or_default(),
        };
        template.check_syntax()?;
        Ok(template)
    }

    /// Declared parameter names, in declaration order.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Whether `name` is a declared parameter.
    pub fn declares(&self, name: &str) -> bool {
        self.params.iter().any(|p| p == name)
    }

    /// Direct service URI; `None` routes via the security server.
    pub fn service_uri(&self) -> Option<&str> {
        self.service_uri.as_deref()
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn envelope(&self) -> &str {
        &self.envelope
    }

    /// Static headers sent with every call.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Placeholders that are neither declared parameters nor builtins.
    pub fn undeclared_placeholders(&self) -> Vec<String> {
        placeholders(&self.envelope)
            .into_iter()
            .filter(|name| !self.declares(name) && !BUILTIN_VARIABLES.contains(&name.as_str()))
            .collect()
    }

    /// Declared parameters that a builtin of the same name will always shadow.
    pub fn shadowed_params(&self) -> Vec<&str> {
        self.params
            .iter()
            .map(String::as_str)
            .filter(|p| BUILTIN_VARIABLES.contains(p))
            .collect()
    }

    fn check_syntax(&self) -> Result<(), GatewayError> {
        let mut registry = Handlebars::new();
        registry
            .register_template_string("envelope", &self.envelope)
            .map_err(|e| GatewayError::Template(format!("Invalid envelope: {}", e)))
    }
}

/// Collect the variable names referenced by `{{name}}`, `{{{name}}}` and `{{& name}}`.
///
/// Block helpers, partials, comments and `else` are skipped.
pub fn placeholders(envelope: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let mut rest = envelope;

    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let after = after.strip_prefix('{').unwrap_or(after);
        let Some(end) = after.find("}}") else {
            break;
        };

        let expr = after[..end].trim().trim_matches('~').trim();
        let expr = expr.strip_prefix('&').unwrap_or(expr).trim();
        let skipped = expr.is_empty() || expr.starts_with(['#', '/', '!', '>', '^']);
        if !skipped {
            if let Some(name) = expr.split_whitespace().next() {
                if name != "else" {
                    names.insert(name.to_string());
                }
            }
        }

        rest = &after[end + 2..];
    }

    names
}
