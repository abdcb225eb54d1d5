use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use outbox::OutboxConfig;
use outbox::TopicMap;
use resilience::PolicyConfig;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    #[serde(default)]
    pub server: ServerSettings,
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub commission: CommissionSettings,
    #[serde(default)]
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub bus: BusSettings,
    #[serde(default)]
    pub resilience: ResilienceSettings,
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
            bind: "0.0.0.0:8010".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    pub key_id: String,
    pub key_secret: String,
    /// Debit account payouts are funded from.
    pub account_number: String,
    pub webhook_secret: String,
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_gateway_base_url() -> String {
    "https://api.razorpay.com".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommissionSettings {
    /// Whole percent, applied when a vendor profile carries no rate.
    pub percent: Decimal,
}

impl Default for CommissionSettings {
    fn default() -> Self {
        Self {
            percent: Decimal::new(10, 0),
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

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    pub orders: PolicyConfig,
    pub payments: PolicyConfig,
    pub payouts: PolicyConfig,
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
        if self.gateway.key_id.is_empty() || self.gateway.key_secret.is_empty() {
            bail!("gateway.key_id and gateway.key_secret must be set");
        }
        if self.gateway.account_number.is_empty() {
            bail!("gateway.account_number must be set");
        }
        if self.gateway.webhook_secret.is_empty() {
            bail!("gateway.webhook_secret must be set");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [database]
            url = "postgres://localhost/payments"

            [gateway]
            key_id = "rzp_test_key"
            key_secret = "secret"
            account_number = "2323230041626905"
            webhook_secret = "whsec"
            "#,
        )
        .unwrap();
        settings.validate().unwrap();

        assert_eq!(settings.server.bind, "0.0.0.0:8010");
        assert_eq!(settings.gateway.timeout_secs, 10);
        assert_eq!(settings.commission.percent, dec!(10));
        assert_eq!(settings.outbox.poll_interval_secs, 30);
        assert_eq!(settings.outbox.batch_size, 100);
        assert_eq!(settings.outbox.max_attempts, 3);
        assert_eq!(settings.outbox.retention_days, 7);
        assert_eq!(settings.bus.topics.payment, "payment-events");
        assert_eq!(settings.resilience.payouts.retry_attempts, 3);
    }

    #[test]
    fn overrides_resilience_policy_knobs() {
        let settings: Settings = toml::from_str(
            r#"
            [database]
            url = "postgres://localhost/payments"

            [gateway]
            key_id = "rzp_test_key"
            key_secret = "secret"
            account_number = "2323230041626905"
            webhook_secret = "whsec"

            [resilience.payouts]
            retry_attempts = 5
            backoff_initial_ms = 100
            failure_rate_threshold = 0.3
            "#,
        )
        .unwrap();

        assert_eq!(settings.resilience.payouts.retry_attempts, 5);
        assert_eq!(settings.resilience.payouts.backoff_initial_ms, 100);
        assert_eq!(settings.resilience.orders.retry_attempts, 3);
    }

    #[test]
    fn rejects_missing_credentials() {
        let settings: Settings = toml::from_str(
            r#"
            [database]
            url = "postgres://localhost/payments"

            [gateway]
            key_id = ""
            key_secret = ""
            account_number = ""
            webhook_secret = ""
            "#,
        )
        .unwrap();

        assert!(settings.validate().is_err());
    }
}
