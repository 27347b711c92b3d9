use crate::errors::PassError;
use crate::settings::Artifacts as ArtifactsCfg;
use crate::storage::Pass;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

pub const PASS_CONTENT_TYPE: &str = "application/vnd.apple.pkpass";

/// External builder that assembles and signs the binary pass package.
/// The bytes are opaque to this service.
#[async_trait]
pub trait ArtifactBuilder: Send + Sync {
    async fn build(&self, pass: &Pass) -> Result<Vec<u8>, PassError>;
}

#[derive(Clone)]
pub struct HttpArtifactBuilder {
    client: reqwest::Client,
    builder_url: String,
}

impl HttpArtifactBuilder {
    pub fn new(cfg: &ArtifactsCfg) -> Result<Self, PassError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            builder_url: cfg.builder_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ArtifactBuilder for HttpArtifactBuilder {
    async fn build(&self, pass: &Pass) -> Result<Vec<u8>, PassError> {
        let response = self
            .client
            .post(format!("{}/passes", self.builder_url))
            .json(&json!({
                "passType": pass.pass_type,
                "serialNumber": pass.serial,
                "updatedAt": pass.updated_at,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PassError::Transport(format!(
                "artifact builder returned {}",
                response.status()
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }
}
