//! Recraft AI image generation provider.

use crate::credentials::Credential;
use crate::error::{ArenaError, Result};
use crate::image::provider::{require_credential, ImageProvider};
use crate::image::types::{GenerationRequest, ImageProviderKind, RawImage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.recraft.ai";

/// Builder for RecraftProvider.
#[derive(Debug, Clone)]
pub struct RecraftProviderBuilder {
    model: String,
    base_url: String,
}

impl Default for RecraftProviderBuilder {
    fn default() -> Self {
        Self {
            model: "sd3".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl RecraftProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the Recraft model identifier.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Overrides the API base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Builds the provider.
    pub fn build(self) -> RecraftProvider {
        RecraftProvider {
            client: reqwest::Client::new(),
            model: self.model,
            base_url: self.base_url,
        }
    }
}

/// Recraft AI provider. Returns a remote URL.
pub struct RecraftProvider {
    client: reqwest::Client,
    model: String,
    base_url: String,
}

impl RecraftProvider {
    /// Creates a new `RecraftProviderBuilder`.
    pub fn builder() -> RecraftProviderBuilder {
        RecraftProviderBuilder::new()
    }
}

#[async_trait]
impl ImageProvider for RecraftProvider {
    async fn generate(
        &self,
        request: &GenerationRequest,
        credential: Option<&Credential>,
    ) -> Result<RawImage> {
        let key = require_credential(self.name(), credential)?;
        let (width, height) = request.options.size_or((1024, 1024));
        let body = RecraftRequest {
            model: &self.model,
            prompt: &request.prompt,
            width,
            height,
        };

        let response = self
            .client
            .post(format!("{}/creations", self.base_url))
            .bearer_auth(key.expose())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(ArenaError::from_response(
                "Recraft",
                status.as_u16(),
                &text,
                &headers,
            ));
        }

        let parsed: RecraftResponse = response.json().await?;
        parsed
            .url
            .filter(|url| !url.is_empty())
            .map(RawImage::Url)
            .ok_or_else(|| {
                ArenaError::UnexpectedResponse("No image URL found in the response".into())
            })
    }

    fn name(&self) -> &str {
        ImageProviderKind::Recraft.as_str()
    }

    fn display_name(&self) -> &str {
        ImageProviderKind::Recraft.display_name()
    }
}

#[derive(Debug, Serialize)]
struct RecraftRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct RecraftResponse {
    #[serde(default)]
    url: Option<String>,
}
