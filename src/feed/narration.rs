//! Narration generation seam.
//!
//! The service turns an image into a spoken description: `{script, audioRef}`.
//! Callers treat it as a black box and cache the result on the memory.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::NarrationConfig;

#[derive(Debug, Error)]
pub enum NarrationError {
    #[error("narration request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("narration service returned status {0}")]
    Status(u16),
    #[error("malformed narration response: {0}")]
    Malformed(&'static str),
    #[error("narration is disabled")]
    Disabled,
}

#[derive(Debug, Clone)]
pub struct NarrationRequest {
    pub memory_id: String,
    /// Public URL of the photo to describe.
    pub image_ref: String,
    pub voice_id: String,
    /// Existing script to voice instead of generating a new one.
    pub script: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Narration {
    pub script: String,
    pub audio_ref: String,
}

#[async_trait]
pub trait NarrationService: Send + Sync {
    async fn generate(&self, request: &NarrationRequest) -> Result<Narration, NarrationError>;

    /// `false` lets callers skip scheduling generation entirely.
    fn is_enabled(&self) -> bool {
        true
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody<'a> {
    image_url: &'a str,
    voice_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    script: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateReply {
    script: Option<String>,
    audio_url: Option<String>,
}

impl GenerateReply {
    fn into_narration(self) -> Result<Narration, NarrationError> {
        let script = self
            .script
            .filter(|s| !s.is_empty())
            .ok_or(NarrationError::Malformed("missing script"))?;
        let audio_ref = self
            .audio_url
            .filter(|s| !s.is_empty())
            .ok_or(NarrationError::Malformed("missing audioUrl"))?;
        Ok(Narration { script, audio_ref })
    }
}

/// JSON-over-HTTP narration backend.
pub struct HttpNarrationService {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpNarrationService {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl NarrationService for HttpNarrationService {
    async fn generate(&self, request: &NarrationRequest) -> Result<Narration, NarrationError> {
        let body = GenerateBody {
            image_url: &request.image_ref,
            voice_id: &request.voice_id,
            script: request.script.as_deref(),
        };

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NarrationError::Status(status.as_u16()));
        }

        let reply: GenerateReply = response
            .json()
            .await
            .map_err(|_| NarrationError::Malformed("response is not JSON"))?;
        let narration = reply.into_narration()?;
        tracing::debug!(memory_id = %request.memory_id, "narration generated");
        Ok(narration)
    }
}

/// Used when no narration provider is configured.
pub struct DisabledNarration;

#[async_trait]
impl NarrationService for DisabledNarration {
    async fn generate(&self, _request: &NarrationRequest) -> Result<Narration, NarrationError> {
        Err(NarrationError::Disabled)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Create a narration service from config.
///
/// Supported providers: `"http"` (POST to `endpoint`) and `"none"`.
pub fn create_service(config: &NarrationConfig) -> Result<Box<dyn NarrationService>> {
    match config.provider.as_str() {
        "http" => {
            let service = HttpNarrationService::new(
                config.endpoint.clone(),
                Duration::from_secs(config.timeout_secs),
            )?;
            Ok(Box::new(service))
        }
        "none" => Ok(Box::new(DisabledNarration)),
        other => bail!("unknown narration provider: {other}. Supported: http, none"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_uses_camel_case_and_omits_missing_script() {
        let body = GenerateBody {
            image_url: "https://x/a.jpg",
            voice_id: "grandpa",
            script: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"imageUrl": "https://x/a.jpg", "voiceId": "grandpa"})
        );
    }

    #[test]
    fn reply_requires_script_and_audio() {
        let ok: GenerateReply =
            serde_json::from_str(r#"{"script": "A picnic.", "audioUrl": "https://x/a.mp3"}"#)
                .unwrap();
        assert_eq!(
            ok.into_narration().unwrap(),
            Narration {
                script: "A picnic.".into(),
                audio_ref: "https://x/a.mp3".into(),
            }
        );

        let partial: GenerateReply = serde_json::from_str(r#"{"script": "A picnic."}"#).unwrap();
        assert!(matches!(
            partial.into_narration(),
            Err(NarrationError::Malformed(_))
        ));
    }

    #[test]
    fn provider_selection() {
        let mut config = NarrationConfig::default();
        assert!(!create_service(&config).unwrap().is_enabled());

        config.provider = "http".into();
        assert!(create_service(&config).unwrap().is_enabled());

        config.provider = "carrier-pigeon".into();
        assert!(create_service(&config).is_err());
    }

    #[tokio::test]
    async fn disabled_service_refuses() {
        let request = NarrationRequest {
            memory_id: "m1".into(),
            image_ref: "https://x/a.jpg".into(),
            voice_id: "default".into(),
            script: None,
        };
        assert!(matches!(
            DisabledNarration.generate(&request).await,
            Err(NarrationError::Disabled)
        ));
    }
}
