use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ExtractionError;

/// A best-effort structured read of a prescription label image. Fields the
/// vision+LLM collaborator couldn't read confidently are left `None` and
/// named in `low_confidence_fields` so the registry can flag them for user
/// review instead of silently guessing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedDraft {
    pub name: Option<String>,
    pub dosage: Option<String>,
    pub schedule_raw: Option<String>,
    pub prescriber: Option<String>,
    pub low_confidence_fields: Vec<String>,
}

/// Black-box collaborator for turning a prescription label photo into a
/// structured draft. The core treats failures as non-fatal: a timeout or
/// error still yields an (empty) draft the user completes manually.
#[async_trait]
pub trait AsyncExtractor: Send + Sync + std::fmt::Debug {
    async fn extract(&self, image_bytes: &[u8], content_type: &str) -> Result<ExtractedDraft, ExtractionError>;
}

/// Configuration for [`HttpExtractor`].
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub endpoint: String,
    pub timeout_seconds: u64,
}

impl ExtractorConfig {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout_seconds: 20,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }
}

/// HTTP-based extractor that posts the image to an external vision+LLM
/// service and expects a JSON-encoded [`ExtractedDraft`] back.
#[derive(Debug)]
pub struct HttpExtractor {
    client: reqwest::Client,
    config: ExtractorConfig,
}

impl HttpExtractor {
    pub fn new(config: ExtractorConfig) -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ExtractionError::Configuration(e.to_string()))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl AsyncExtractor for HttpExtractor {
    async fn extract(&self, image_bytes: &[u8], content_type: &str) -> Result<ExtractedDraft, ExtractionError> {
        let part = reqwest::multipart::Part::bytes(image_bytes.to_vec()).mime_str(content_type).map_err(|e| {
            ExtractionError::Configuration(format!("invalid content type {content_type}: {e}"))
        })?;
        let form = reqwest::multipart::Form::new().part("image", part);

        debug!(endpoint = %self.config.endpoint, "sending prescription extraction request");

        let response = self
            .client
            .post(&self.config.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExtractionError::Timeout(self.config.timeout_seconds)
                } else {
                    ExtractionError::Http(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "extractor returned error");
            return Err(ExtractionError::Api(format!("HTTP {status}: {body}")));
        }

        response
            .json::<ExtractedDraft>()
            .await
            .map_err(|e| ExtractionError::Parse(e.to_string()))
    }
}

/// Fallback extractor used when no extraction endpoint is configured.
/// Returns an empty draft with every field flagged for manual completion
/// rather than failing the whole request.
#[derive(Debug, Clone, Default)]
pub struct NoopExtractor;

#[async_trait]
impl AsyncExtractor for NoopExtractor {
    async fn extract(&self, _image_bytes: &[u8], _content_type: &str) -> Result<ExtractedDraft, ExtractionError> {
        Ok(ExtractedDraft {
            low_confidence_fields: vec![
                "name".to_owned(),
                "dosage".to_owned(),
                "schedule_raw".to_owned(),
            ],
            ..ExtractedDraft::default()
        })
    }
}
