//! Mutual TLS trust material.
//!
//! Loads the client identity (private key + certificate chain under a fixed
//! alias) from a PKCS#12 keystore and the accepted peer certificates from a
//! PKCS#12 trust store, and builds a rustls client configuration that
//! presents the client certificate and verifies the peer against the trust
//! store only (no platform roots).

use crate::config::TlsConfig;
use crate::error::GatewayError;
use p12_keystore::{KeyStore, KeyStoreEntry};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ClientConfig, RootCertStore};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Client identity loaded from a keystore.
pub struct ClientIdentityMaterial {
    pub chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl std::fmt::Debug for ClientIdentityMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentityMaterial")
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

/// Build the mutual TLS client configuration. Blocking: reads both stores from disk.
pub fn build_client_config(config: &TlsConfig) -> Result<ClientConfig, GatewayError> {
    let keystore_path = config
        .keystore
        .as_deref()
        .ok_or_else(|| GatewayError::Config("tls.keystore is not configured".to_string()))?;
    let truststore_path = config
        .truststore
        .as_deref()
        .map(strip_file_prefix)
        .ok_or_else(|| GatewayError::Config("tls.truststore is not configured".to_string()))?;

    let keystore = read_pkcs12(keystore_path, &config.keystore_password)?;
    let identity = client_identity(&keystore, &config.key_alias)?;
    info!(
        alias = %config.key_alias,
        chain_len = identity.chain.len(),
        "Loaded client certificate"
    );

    let truststore = read_pkcs12(Path::new(truststore_path), config.truststore_password())?;
    let roots = trust_roots(&truststore)?;
    info!(trusted = roots.len(), "Loaded trust store");

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| GatewayError::Config(format!("Unsupported TLS protocol set: {}", e)))?
        .with_root_certificates(roots)
        .with_client_auth_cert(identity.chain, identity.key)
        .map_err(|e| GatewayError::Config(format!("Client certificate rejected: {}", e)))
}

/// Strip an optional `file:` URL-style prefix from a store path.
pub fn strip_file_prefix(path: &str) -> &str {
    path.strip_prefix("file://")
        .or_else(|| path.strip_prefix("file:"))
        .unwrap_or(path)
}

fn read_pkcs12(path: &Path, password: &str) -> Result<KeyStore, GatewayError> {
    let data = std::fs::read(path).map_err(|e| {
        GatewayError::Config(format!("Cannot read PKCS#12 store {}: {}", path.display(), e))
    })?;
    KeyStore::from_pkcs12(&data, password).map_err(|e| {
        GatewayError::Config(format!("Cannot open PKCS#12 store {}: {}", path.display(), e))
    })
}

/// Extract the private key and chain stored under `alias`.
pub fn client_identity(
    keystore: &KeyStore,
    alias: &str,
) -> Result<ClientIdentityMaterial, GatewayError> {
    let chain = match keystore.entry(alias) {
        Some(KeyStoreEntry::PrivateKeyChain(chain)) => chain,
        _ => {
            return Err(GatewayError::Config(format!(
                "Could not find key/cert chain for alias '{}' in keystore",
                alias
            )))
        }
    };

    if chain.chain().is_empty() {
        return Err(GatewayError::Config(format!(
            "Certificate chain for alias '{}' is empty",
            alias
        )));
    }

    Ok(ClientIdentityMaterial {
        chain: chain
            .chain()
            .iter()
            .map(|cert| CertificateDer::from(cert.as_der().to_vec()))
            .collect(),
        key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(chain.key().to_vec())),
    })
}

/// Every certificate in the trust store becomes a trust anchor.
pub fn trust_roots(truststore: &KeyStore) -> Result<RootCertStore, GatewayError> {
    let mut roots = RootCertStore::empty();
    for (alias, entry) in truststore.entries() {
        let certs = match entry {
            KeyStoreEntry::Certificate(cert) => std::slice::from_ref(cert),
            KeyStoreEntry::PrivateKeyChain(chain) => chain.chain(),
        };
        for cert in certs {
            roots
                .add(CertificateDer::from(cert.as_der().to_vec()))
                .map_err(|e| {
                    GatewayError::Config(format!(
                        "Trust store entry '{}' is not a usable certificate: {}",
                        alias, e
                    ))
                })?;
        }
    }

    if roots.is_empty() {
        return Err(GatewayError::Config("Trust store contains no certificates".to_string()));
    }
    Ok(roots)
}
