//! Configuration types for the X-Road gateway.

use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

/// Main gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Inbound HTTP listener
    pub server: ServerConfig,

    /// Security server endpoint
    pub security_server: SecurityServerConfig,

    /// Mutual TLS trust material
    pub tls: TlsConfig,

    /// X-Road client identity injected into envelopes
    pub client: ClientIdentity,

    /// Template source
    pub templates: TemplatesConfig,

    /// Field filter policy source
    pub policy: PolicyConfig,

    /// Direct (non security server) service calls
    pub direct: DirectConfig,

    /// Inbound header forwarding
    pub forwarding: ForwardingConfig,
}

impl GatewayConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self, GatewayError> {
        serde_yaml::from_str(content)
            .map_err(|e| GatewayError::Config(format!("Invalid configuration: {}", e)))
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), GatewayError> {
        let url = self.security_server.parsed_url()?;

        if url.scheme() == "https" {
            if self.tls.keystore.is_none() {
                return Err(GatewayError::Config(
                    "tls.keystore is required for an https security server".to_string(),
                ));
            }
            if self.tls.truststore.is_none() {
                return Err(GatewayError::Config(
                    "tls.truststore is required for an https security server".to_string(),
                ));
            }
        }

        if self.server.body_limit_bytes == 0 {
            return Err(GatewayError::Config("server.body_limit_bytes must be positive".to_string()));
        }

        if self.templates.root.as_os_str().is_empty() {
            return Err(GatewayError::Config("templates.root must not be empty".to_string()));
        }

        Url::parse(&self.policy.base_url).map_err(|e| {
            GatewayError::Config(format!(
                "Invalid policy.base_url '{}': {}",
                self.policy.base_url, e
            ))
        })?;

        for pattern in &self.templates.exclude {
            glob::Pattern::new(pattern).map_err(|e| {
                GatewayError::Config(format!("Invalid exclude pattern '{}': {}", pattern, e))
            })?;
        }

        Ok(())
    }
}

/// Inbound listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind
    pub listen: String,

    /// Maximum inbound request body in bytes
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            body_limit_bytes: 1024 * 1024,
        }
    }
}

/// Security server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityServerConfig {
    /// Base URI; https enables mutual TLS
    pub url: String,

    /// Per-call timeout in seconds
    pub timeout_secs: u64,
}

impl SecurityServerConfig {
    /// Parse the configured URL.
    pub fn parsed_url(&self) -> Result<Url, GatewayError> {
        Url::parse(&self.url).map_err(|e| {
            GatewayError::Config(format!("Invalid security_server.url '{}': {}", self.url, e))
        })
    }

    /// Whether the security server is reached over a secure scheme.
    pub fn is_secure(&self) -> bool {
        self.url.to_ascii_lowercase().starts_with("https")
    }
}

impl Default for SecurityServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            timeout_secs: 30,
        }
    }
}

/// PKCS#12 trust material for the security server channel.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Client keystore (private key + certificate chain)
    pub keystore: Option<PathBuf>,

    /// Keystore password
    pub keystore_password: String,

    /// Alias of the client key entry
    pub key_alias: String,

    /// Trust store; a `file:` prefix is accepted
    pub truststore: Option<String>,

    /// Trust store password (defaults to the keystore password)
    pub truststore_password: Option<String>,
}

impl TlsConfig {
    /// Effective trust store password.
    pub fn truststore_password(&self) -> &str {
        self.truststore_password
            .as_deref()
            .unwrap_or(&self.keystore_password)
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            keystore: None,
            keystore_password: String::new(),
            key_alias: "xtr-server".to_string(),
            truststore: None,
            truststore_password: None,
        }
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("keystore", &self.keystore)
            .field("keystore_password", &"***")
            .field("key_alias", &self.key_alias)
            .field("truststore", &self.truststore)
            .field("truststore_password", &self.truststore_password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// X-Road client subsystem identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientIdentity {
    /// X-Road instance name (e.g. "EE")
    pub instance: String,

    /// Member class (e.g. "GOV")
    pub member_class: String,

    /// Member registry code
    pub member_code: String,

    /// Subsystem code
    pub subsystem_code: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            instance: "EE".to_string(),
            member_class: "GOV".to_string(),
            member_code: String::new(),
            subsystem_code: String::new(),
        }
    }
}

/// Template source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplatesConfig {
    /// Root directory scanned at startup
    pub root: PathBuf,

    /// Glob patterns; a path is skipped if any component or its root-relative path matches
    pub exclude: Vec<String>,

    /// Remote template index. Refused at startup.
    pub remote_source: Option<String>,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/DSL"),
            exclude: vec!["Ruuter.public".to_string()],
            remote_source: None,
        }
    }
}

/// Field filter policy source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Admin API base URL
    pub base_url: String,

    /// Per-call timeout in seconds
    pub timeout_secs: u64,

    /// How policy entries are matched against response leaves
    pub field_matching: FieldMatching,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: 5,
            field_matching: FieldMatching::default(),
        }
    }
}

/// Policy entry matching mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldMatching {
    /// Entry segments must equal the trailing segments of the leaf path
    #[default]
    PathSuffix,
    /// Only the entry's last segment is compared with the leaf name
    LeafName,
}

/// Direct service call settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectConfig {
    /// Per-call timeout in seconds
    pub timeout_secs: u64,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

/// Inbound headers copied onto the outbound request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Header names (case-insensitive)
    pub headers: Vec<String>,
}
