use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use outbox::OutboxConfig;
use outbox::TopicMap;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use vault_crypto::Crypto;
use vault_crypto::DevCrypto;
use vault_crypto::VaultTransit;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub kms: KmsSettings,
    #[serde(default)]
    pub crypto: CryptoSettings,
    #[serde(default)]
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub bus: BusSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8020".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KmsSettings {
    pub uri: String,
    pub token: String,
    pub pii_key: String,
    pub hmac_key: String,
}

impl Default for KmsSettings {
    fn default() -> Self {
        Self {
            uri: String::new(),
            token: String::new(),
            pii_key: "user_pii".to_string(),
            hmac_key: "user_search_hmac".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CryptoSettings {
    /// "transit" (the real KMS) or "dev" (base64 wrapper, local HMAC).
    /// The dev backend must be opted into explicitly.
    pub backend: String,
    pub dev_hmac_key: String,
}

impl Default for CryptoSettings {
    fn default() -> Self {
        Self {
            backend: "transit".to_string(),
            dev_hmac_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub topics: TopicMap,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8082".to_string(),
            timeout_secs: 5,
            topics: TopicMap::default(),
        }
    }
}

impl Settings {
    pub fn new(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("could not read settings at {}", path.display()))?;
        let settings: Settings = toml::from_str(&raw)
            .with_context(|| format!("could not parse settings at {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            bail!("database.url must be set");
        }
        match self.crypto.backend.as_str() {
            "transit" => {
                if self.kms.uri.is_empty() || self.kms.token.is_empty() {
                    bail!("crypto backend 'transit' requires kms.uri and kms.token");
                }
            }
            "dev" => {
                if self.crypto.dev_hmac_key.is_empty() {
                    bail!("crypto backend 'dev' requires crypto.dev_hmac_key");
                }
            }
            other => bail!("unknown crypto backend '{other}'"),
        }
        Ok(())
    }

    /// Wire the configured crypto backend. The dev backend never becomes
    /// the default; a transit backend without a KMS refuses to start.
    pub fn build_crypto(&self) -> Result<Arc<dyn Crypto>> {
        match self.crypto.backend.as_str() {
            "transit" => Ok(Arc::new(VaultTransit::new(
                self.kms.uri.clone(),
                self.kms.token.clone(),
                self.kms.pii_key.clone(),
                self.kms.hmac_key.clone(),
            )?)),
            "dev" => {
                tracing::warn!("Using the dev crypto backend; PII is NOT encrypted");
                Ok(Arc::new(DevCrypto::new(
                    self.crypto.dev_hmac_key.clone().into_bytes(),
                )))
            }
            other => bail!("unknown crypto backend '{other}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transit_backend_requires_kms() {
        let settings: Settings = toml::from_str(
            r#"
            [database]
            url = "postgres://localhost/identity"
            "#,
        )
        .unwrap();

        assert!(settings.validate().is_err());
    }

    #[test]
    fn transit_backend_with_kms_validates() {
        let settings: Settings = toml::from_str(
            r#"
            [database]
            url = "postgres://localhost/identity"

            [kms]
            uri = "http://vault:8200"
            token = "s.token"
            "#,
        )
        .unwrap();
        settings.validate().unwrap();

        assert_eq!(settings.kms.pii_key, "user_pii");
        assert_eq!(settings.kms.hmac_key, "user_search_hmac");
    }

    #[test]
    fn dev_backend_must_be_explicit_and_keyed() {
        let settings: Settings = toml::from_str(
            r#"
            [database]
            url = "postgres://localhost/identity"

            [crypto]
            backend = "dev"
            dev_hmac_key = "local-test-key"
            "#,
        )
        .unwrap();
        settings.validate().unwrap();

        let missing_key: Settings = toml::from_str(
            r#"
            [database]
            url = "postgres://localhost/identity"

            [crypto]
            backend = "dev"
            "#,
        )
        .unwrap();
        assert!(missing_key.validate().is_err());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let settings: Settings = toml::from_str(
            r#"
            [database]
            url = "postgres://localhost/identity"

            [crypto]
            backend = "mock"
            "#,
        )
        .unwrap();

        assert!(settings.validate().is_err());
    }
}
