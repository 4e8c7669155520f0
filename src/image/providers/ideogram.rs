//! Ideogram image generation provider.

use crate::credentials::Credential;
use crate::error::{ArenaError, Result};
use crate::image::provider::{require_credential, ImageProvider};
use crate::image::types::{GenerationRequest, ImageProviderKind, RawImage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.ideogram.ai";

/// Builder for IdeogramProvider.
#[derive(Debug, Clone)]
pub struct IdeogramProviderBuilder {
    model: String,
    style: String,
    base_url: String,
}

impl Default for IdeogramProviderBuilder {
    fn default() -> Self {
        Self {
            model: "model-2.0".to_string(),
            style: "natural".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl IdeogramProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the Ideogram model identifier.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the rendering style.
    pub fn style(mut self, style: impl Into<String>) -> Self {
        self.style = style.into();
        self
    }

    /// Overrides the API base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Builds the provider.
    pub fn build(self) -> IdeogramProvider {
        IdeogramProvider {
            client: reqwest::Client::new(),
            model: self.model,
            style: self.style,
            base_url: self.base_url,
        }
    }
}

/// Ideogram provider. Returns a remote URL.
pub struct IdeogramProvider {
    client: reqwest::Client,
    model: String,
    style: String,
    base_url: String,
}

impl IdeogramProvider {
    /// Creates a new `IdeogramProviderBuilder`.
    pub fn builder() -> IdeogramProviderBuilder {
        IdeogramProviderBuilder::new()
    }
}

#[async_trait]
impl ImageProvider for IdeogramProvider {
    async fn generate(
        &self,
        request: &GenerationRequest,
        credential: Option<&Credential>,
    ) -> Result<RawImage> {
        let key = require_credential(self.name(), credential)?;
        let (width, height) = request.options.size_or((1024, 1024));
        let body = IdeogramRequest {
            model: &self.model,
            prompt: &request.prompt,
            width,
            height,
            style: &self.style,
            num_images: 1,
            seed: request.options.seed,
        };

        let response = self
            .client
            .post(format!("{}/api/v1/images/generations", self.base_url))
            .bearer_auth(key.expose())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(ArenaError::from_response(
                "Ideogram",
                status.as_u16(),
                &text,
                &headers,
            ));
        }

        let parsed: IdeogramResponse = response.json().await?;
        parsed
            .generations
            .into_iter()
            .find_map(|g| g.url)
            .map(RawImage::Url)
            .ok_or_else(|| {
                ArenaError::UnexpectedResponse("No image URL found in the response".into())
            })
    }

    fn name(&self) -> &str {
        ImageProviderKind::Ideogram.as_str()
    }

    fn display_name(&self) -> &str {
        ImageProviderKind::Ideogram.display_name()
    }
}

#[derive(Debug, Serialize)]
struct IdeogramRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    width: u32,
    height: u32,
    style: &'a str,
    num_images: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct IdeogramResponse {
    #[serde(default)]
    generations: Vec<IdeogramGeneration>,
}

#[derive(Debug, Deserialize)]
struct IdeogramGeneration {
    #[serde(default)]
    url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    #[tokio::test]
    async fn test_generate_returns_first_url() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/api/v1/images/generations")
            .match_header("authorization", "Bearer ig-key")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "model-2.0",
                "style": "natural",
                "num_images": 1
            })))
            .with_status(200)
            .with_body(
                r#"{"generations":[{"id":"1"},{"url":"https://ideogram.example/1.png"}]}"#,
            )
            .create_async()
            .await;

        let provider = IdeogramProvider::builder().base_url(server.url()).build();
        let key = Credential::new("ig-key");
        let image = provider
            .generate(&GenerationRequest::new("A fox"), Some(&key))
            .await
            .unwrap();
        assert_eq!(image, RawImage::Url("https://ideogram.example/1.png".into()));
    }

    #[tokio::test]
    async fn test_generate_rate_limited() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/api/v1/images/generations")
            .with_status(429)
            .with_header("retry-after", "3")
            .with_body("too many requests")
            .create_async()
            .await;

        let provider = IdeogramProvider::builder().base_url(server.url()).build();
        let key = Credential::new("ig-key");
        let err = provider
            .generate(&GenerationRequest::new("A fox"), Some(&key))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(3)));
    }
}
