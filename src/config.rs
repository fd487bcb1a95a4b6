use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub sms: SmsConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Allowed CORS origins. Empty means any origin (the mobile client has none).
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Insert the sample newspaper catalogue when the table is empty.
    #[serde(default)]
    pub seed_sample: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(default = "default_jwt_expiry")]
    pub jwt_expiry_hours: u64,
}

/// Payment gateway credentials. Both unset means orders are mocked locally.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsConfig {
    pub key_id: Option<String>,
    pub key_secret: Option<String>,
    #[serde(default = "default_gateway_url")]
    pub base_url: String,
    #[serde(default = "default_currency")]
    pub currency: String,
}

/// Messaging provider credentials. Unset (or dry_run) means messages are only logged.
#[derive(Debug, Clone, Deserialize)]
pub struct SmsConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub from_number: Option<String>,
    #[serde(default = "default_sms_url")]
    pub base_url: String,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_distance")]
    pub max_distance_meters: f64,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            key_id: None,
            key_secret: None,
            base_url: default_gateway_url(),
            currency: default_currency(),
        }
    }
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            account_sid: None,
            auth_token: None,
            from_number: None,
            base_url: default_sms_url(),
            dry_run: false,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self { max_distance_meters: default_max_distance() }
    }
}

impl PaymentsConfig {
    /// Returns (key_id, key_secret) when the gateway is fully configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.key_id.as_deref(), self.key_secret.as_deref()) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => Some((id, secret)),
            _ => None,
        }
    }
}

impl SmsConfig {
    pub fn is_configured(&self) -> bool {
        [&self.account_sid, &self.auth_token, &self.from_number]
            .iter()
            .all(|v| v.as_deref().is_some_and(|s| !s.is_empty()))
    }
}

fn default_bind() -> String { "0.0.0.0".to_string() }
fn default_api_port() -> u16 { 5000 }
fn default_db_path() -> String { "./newsdesk.db".to_string() }
fn default_jwt_expiry() -> u64 { 24 * 90 }
fn default_gateway_url() -> String { "https://api.razorpay.com".to_string() }
fn default_currency() -> String { "INR".to_string() }
fn default_sms_url() -> String { "https://api.twilio.com".to_string() }
fn default_max_distance() -> f64 { 10_000.0 }

const DEFAULT_JWT_SECRET: &str = "change-me-in-production";

pub fn validate(cfg: &Config) -> Result<()> {
    if cfg.auth.jwt_secret == DEFAULT_JWT_SECRET {
        anyhow::bail!(
            "SECURITY ERROR: JWT secret must be changed from default value '{}'. \
            Set NEWSDESK__AUTH__JWT_SECRET environment variable with a strong random value.",
            DEFAULT_JWT_SECRET
        );
    }

    if cfg.auth.jwt_secret.len() < 32 {
        anyhow::bail!(
            "CONFIG ERROR: JWT secret must be at least 32 characters (current: {})",
            cfg.auth.jwt_secret.len()
        );
    }

    if cfg.database.path != ":memory:" {
        if let Some(parent) = std::path::Path::new(&cfg.database.path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                anyhow::bail!(
                    "CONFIG ERROR: Database directory does not exist: {}",
                    parent.display()
                );
            }
        }
    }

    let p = &cfg.payments;
    if p.key_id.is_some() != p.key_secret.is_some() {
        anyhow::bail!("CONFIG ERROR: payments.key_id and payments.key_secret must be set together");
    }

    let s = &cfg.sms;
    let set = [&s.account_sid, &s.auth_token, &s.from_number]
        .iter()
        .filter(|v| v.is_some())
        .count();
    if set != 0 && set != 3 {
        anyhow::bail!(
            "CONFIG ERROR: sms.account_sid, sms.auth_token and sms.from_number must be set together"
        );
    }

    if cfg.delivery.max_distance_meters <= 0.0 {
        anyhow::bail!("CONFIG ERROR: delivery.max_distance_meters must be positive");
    }

    tracing::info!("Configuration validation passed");
    Ok(())
}

pub fn load() -> Result<Config> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name("config").required(false))
        .add_source(
            config::Environment::with_prefix("NEWSDESK")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("api.cors_allowed_origins")
                .try_parsing(true),
        )
        .set_default("api.bind", "0.0.0.0")?
        .set_default("api.port", 5000)?
        .set_default("database.path", "./newsdesk.db")?
        .set_default("auth.jwt_secret", DEFAULT_JWT_SECRET)?
        .set_default("auth.jwt_expiry_hours", 24 * 90)?
        .build()?
        .try_deserialize()?;

    validate(&cfg)?;

    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config {
            api: ApiConfig { port: 5000, bind: "127.0.0.1".into(), cors_allowed_origins: vec![] },
            database: DatabaseConfig { path: ":memory:".into(), seed_sample: false },
            auth: AuthConfig {
                jwt_secret: "a-very-long-secret-used-only-in-config-tests".into(),
                jwt_expiry_hours: 1,
            },
            payments: PaymentsConfig::default(),
            sms: SmsConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate(&base()).is_ok());
    }

    #[test]
    fn test_default_secret_rejected() {
        let mut cfg = base();
        cfg.auth.jwt_secret = DEFAULT_JWT_SECRET.into();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_short_secret_rejected() {
        let mut cfg = base();
        cfg.auth.jwt_secret = "short".into();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_half_configured_gateway_rejected() {
        let mut cfg = base();
        cfg.payments.key_id = Some("rzp_test_123".into());
        assert!(validate(&cfg).is_err());

        cfg.payments.key_secret = Some("secret".into());
        assert!(validate(&cfg).is_ok());
        assert_eq!(cfg.payments.credentials(), Some(("rzp_test_123", "secret")));
    }

    #[test]
    fn test_half_configured_sms_rejected() {
        let mut cfg = base();
        cfg.sms.account_sid = Some("AC123".into());
        cfg.sms.auth_token = Some("token".into());
        assert!(validate(&cfg).is_err());

        cfg.sms.from_number = Some("+15550001111".into());
        assert!(validate(&cfg).is_ok());
        assert!(cfg.sms.is_configured());
    }

    #[test]
    fn test_missing_database_directory_rejected() {
        let mut cfg = base();
        cfg.database.path = "/definitely/not/a/real/dir/newsdesk.db".into();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_default_delivery_radius() {
        assert_eq!(DeliveryConfig::default().max_distance_meters, 10_000.0);
    }
}
