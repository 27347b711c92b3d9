use crate::errors::PassError;
use crate::settings::Push as PushCfg;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

/// Outcome of a single wake-up delivery, as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// The address is permanently invalid (e.g. the pass was removed from
    /// the device). The registration should be purged.
    AddressGone,
}

/// External push transport. The wake-up carries no payload; it only prompts
/// the device to poll for changed passes.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send_wakeup(&self, push_token: &str, topic: &str) -> Result<PushOutcome, PassError>;
}

#[derive(Clone)]
pub struct HttpPushTransport {
    client: reqwest::Client,
    gateway_url: String,
}

impl HttpPushTransport {
    pub fn new(cfg: &PushCfg) -> Result<Self, PassError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            gateway_url: cfg.gateway_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PushTransport for HttpPushTransport {
    async fn send_wakeup(&self, push_token: &str, topic: &str) -> Result<PushOutcome, PassError> {
        let response = self
            .client
            .post(format!("{}/push", self.gateway_url))
            .json(&json!({
                "pushToken": push_token,
                "topic": topic,
            }))
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => Ok(PushOutcome::Delivered),
            reqwest::StatusCode::GONE => Ok(PushOutcome::AddressGone),
            s => Err(PassError::Transport(format!(
                "push gateway returned {}",
                s
            ))),
        }
    }
}
