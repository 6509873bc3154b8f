//! Response field filtering.
//!
//! A per-service policy names the fields to return and the fields to mask.
//! Filtering is best effort: when no policy exists or it cannot be fetched,
//! the document is returned unchanged.

use crate::config::{FieldMatching, PolicyConfig};
use crate::error::GatewayError;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Replacement for sensitive leaf values.
pub const MASK: &str = "[SENSITIVE_DATA_MASKED]";

/// Field selection and masking policy for one service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPolicy {
    pub selected: BTreeSet<String>,
    pub sensitive: BTreeSet<String>,
}

impl FilterPolicy {
    pub fn new<S, T>(selected: S, sensitive: T) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        Self {
            selected: selected.into_iter().map(Into::into).collect(),
            sensitive: sensitive.into_iter().map(Into::into).collect(),
        }
    }

    /// A policy that neither selects nor masks anything.
    pub fn is_noop(&self) -> bool {
        self.selected.is_empty() && self.sensitive.is_empty()
    }
}

/// Where policies come from.
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// `Ok(None)` means no policy is configured for `service`.
    async fn fetch(&self, service: &str) -> Result<Option<FilterPolicy>, GatewayError>;
}

/// Wire shape of the admin API filter endpoint.
#[derive(Debug, Deserialize)]
struct PolicyResponse {
    selected_fields: Option<Vec<String>>,
    sensitive_fields: Option<Vec<String>>,
}

/// Fetches policies from `{base}/api/config/service/{service}/filter`.
pub struct HttpPolicySource {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpPolicySource {
    pub fn new(config: &PolicyConfig) -> Result<Self, GatewayError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            GatewayError::Config(format!("Invalid policy.base_url '{}': {}", config.base_url, e))
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, base_url })
    }

    /// Endpoint URL for `service`, with the service name as one escaped path segment.
    pub fn endpoint(&self, service: &str) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::Config("policy.base_url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["api", "config", "service", service, "filter"]);
        Ok(url)
    }
}

#[async_trait]
impl PolicySource for HttpPolicySource {
    async fn fetch(&self, service: &str) -> Result<Option<FilterPolicy>, GatewayError> {
        let url = self.endpoint(service)?;
        debug!(url = %url, "Fetching filter policy");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| crate::transport::classify(&e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: PolicyResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(format!("Invalid policy body: {}", e)))?;

        Ok(match (body.selected_fields, body.sensitive_fields) {
            (Some(selected), Some(sensitive)) => Some(FilterPolicy::new(selected, sensitive)),
            _ => None,
        })
    }
}

/// Applies the fetched policy to normalized responses.
pub struct FieldFilter {
    source: Arc<dyn PolicySource>,
    matching: FieldMatching,
}

impl FieldFilter {
    pub fn new(source: Arc<dyn PolicySource>, matching: FieldMatching) -> Self {
        Self { source, matching }
    }

    /// Filter `document` for `service`. Never fails; any problem yields the input.
    pub async fn filter(&self, service: &str, document: Value) -> Value {
        match self.source.fetch(service).await {
            Ok(Some(policy)) if !policy.is_noop() => {
                info!(
                    service = %service,
                    selected = policy.selected.len(),
                    sensitive = policy.sensitive.len(),
                    "Filtering response"
                );
                apply(&policy, self.matching, document)
            }
            Ok(Some(_)) => {
                debug!(service = %service, "Empty filter policy, returning full response");
                document
            }
            Ok(None) => {
                info!(service = %service, "No filter policy configured, returning full response");
                document
            }
            Err(e) => {
                warn!(
                    service = %service,
                    error = %e,
                    "Failed to fetch filter policy, returning full response"
                );
                document
            }
        }
    }
}

/// Policy entries split into path segments.
struct Rules {
    selected: Vec<Vec<String>>,
    sensitive: Vec<Vec<String>>,
    matching: FieldMatching,
}

impl Rules {
    fn new(policy: &FilterPolicy, matching: FieldMatching) -> Self {
        let split = |entries: &BTreeSet<String>| {
            entries
                .iter()
                .map(|e| e.split('.').map(str::to_string).collect())
                .collect()
        };
        Self {
            selected: split(&policy.selected),
            sensitive: split(&policy.sensitive),
            matching,
        }
    }

    fn matches_any(&self, entries: &[Vec<String>], path: &[String]) -> bool {
        entries.iter().any(|entry| self.matches(entry, path))
    }

    fn matches(&self, entry: &[String], path: &[String]) -> bool {
        match self.matching {
            FieldMatching::LeafName => entry.last() == path.last(),
            FieldMatching::PathSuffix => {
                entry.len() <= path.len()
                    && entry.iter().rev().zip(path.iter().rev()).all(|(e, p)| e == p)
            }
        }
    }
}

/// Apply `policy` to `document`.
///
/// Leaves not selected are dropped (an empty selection keeps every leaf),
/// selected leaves matching a sensitive entry are masked, and containers
/// left without children are pruned. A root that loses everything becomes
/// an empty container of the same kind.
pub fn apply(policy: &FilterPolicy, matching: FieldMatching, document: Value) -> Value {
    let rules = Rules::new(policy, matching);
    let empty_root = match &document {
        Value::Object(_) => Value::Object(Map::new()),
        Value::Array(_) => Value::Array(Vec::new()),
        _ => return document,
    };

    let mut path = Vec::new();
    filter_node(document, &mut path, &rules).unwrap_or(empty_root)
}

fn filter_node(node: Value, path: &mut Vec<String>, rules: &Rules) -> Option<Value> {
    match node {
        Value::Object(fields) => {
            let mut kept = Map::new();
            for (name, value) in fields {
                // Text mixed with attributes belongs to the enclosing element.
                let pushed = !name.is_empty();
                if pushed {
                    path.push(name.clone());
                }
                let filtered = filter_node(value, path, rules);
                if pushed {
                    path.pop();
                }
                if let Some(value) = filtered {
                    kept.insert(name, value);
                }
            }
            (!kept.is_empty()).then_some(Value::Object(kept))
        }
        Value::Array(items) => {
            // Elements take the path of the field holding the array.
            let kept: Vec<Value> = items
                .into_iter()
                .filter_map(|item| filter_node(item, path, rules))
                .collect();
            (!kept.is_empty()).then_some(Value::Array(kept))
        }
        leaf => filter_leaf(leaf, path, rules),
    }
}

fn filter_leaf(leaf: Value, path: &[String], rules: &Rules) -> Option<Value> {
    if path.is_empty() {
        return Some(leaf);
    }
    if !rules.selected.is_empty() && !rules.matches_any(&rules.selected, path) {
        return None;
    }
    if rules.matches_any(&rules.sensitive, path) {
        return Some(Value::String(MASK.to_string()));
    }
    Some(leaf)
}
