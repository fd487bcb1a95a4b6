//! Outbound SMS notifications.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::SmsConfig;
use crate::error::{AppError, AppResult};
use crate::metrics::PlatformMetrics;

const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct MessageReceipt {
    pub sid: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send_sms(&self, to: &str, body: &str) -> AppResult<MessageReceipt>;
}

pub fn from_config(cfg: &SmsConfig) -> anyhow::Result<Arc<dyn SmsSender>> {
    if cfg.dry_run || !cfg.is_configured() {
        tracing::warn!("SMS provider not configured or in dry-run mode; messages will only be logged");
        return Ok(Arc::new(LogSender));
    }
    match (&cfg.account_sid, &cfg.auth_token, &cfg.from_number) {
        (Some(sid), Some(token), Some(from)) => {
            Ok(Arc::new(TwilioSender::new(&cfg.base_url, sid, token, from)?))
        }
        _ => Ok(Arc::new(LogSender)),
    }
}

/// Deliver a message, logging instead of failing when the provider errors.
/// Returns whether the message went out.
pub async fn notify_best_effort(sms: &dyn SmsSender, metrics: &PlatformMetrics, to: &str, body: &str) -> bool {
    let delivered = match sms.send_sms(to, body).await {
        Ok(receipt) => {
            tracing::debug!(sid = %receipt.sid, "SMS sent to {}", to);
            true
        }
        Err(e) => {
            tracing::warn!("Failed to send SMS to {}: {}", to, e);
            false
        }
    };
    metrics.record_notification(delivered);
    delivered
}

pub struct TwilioSender {
    messages_url: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct ProviderError {
    #[serde(default)]
    message: Option<String>,
}

impl TwilioSender {
    pub fn new(base_url: &str, account_sid: &str, auth_token: &str, from_number: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            messages_url: format!(
                "{}/2010-04-01/Accounts/{}/Messages.json",
                base_url.trim_end_matches('/'),
                account_sid
            ),
            account_sid: account_sid.to_string(),
            auth_token: auth_token.to_string(),
            from_number: from_number.to_string(),
            http,
        })
    }

    async fn send(&self, to: &str, body: &str) -> AppResult<MessageReceipt> {
        let response = self
            .http
            .post(&self.messages_url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("From", self.from_number.as_str()), ("To", to), ("Body", body)])
            .send()
            .await
            .map_err(|e| AppError::Upstream { status: 502, message: format!("SMS request failed: {}", e) })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ProviderError>()
                .await
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_else(|| format!("SMS provider returned {}", status));
            return Err(AppError::Upstream { status: status.as_u16(), message });
        }

        response.json::<MessageReceipt>().await.map_err(|e| AppError::Upstream {
            status: 502,
            message: format!("Unexpected SMS provider response: {}", e),
        })
    }
}

#[async_trait]
impl SmsSender for TwilioSender {
    async fn send_sms(&self, to: &str, body: &str) -> AppResult<MessageReceipt> {
        self.send(to, body).await
    }
}

/// Writes messages to the log instead of sending them.
pub struct LogSender;

#[async_trait]
impl SmsSender for LogSender {
    async fn send_sms(&self, to: &str, body: &str) -> AppResult<MessageReceipt> {
        tracing::info!("SMS to {}: {}", to, body);
        Ok(MessageReceipt { sid: "logged".to_string(), status: Some("skipped".to_string()) })
    }
}
