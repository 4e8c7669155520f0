//! OpenAI DALL-E image generation provider.

use crate::credentials::Credential;
use crate::error::{ArenaError, Result};
use crate::image::provider::{require_credential, ImageProvider};
use crate::image::types::{GenerationRequest, ImageProviderKind, RawImage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// OpenAI image model variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OpenAiImageModel {
    /// DALL-E 3.
    #[default]
    DallE3,
    /// DALL-E 2.
    DallE2,
}

impl OpenAiImageModel {
    /// Returns the API model identifier string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DallE3 => "dall-e-3",
            Self::DallE2 => "dall-e-2",
        }
    }
}

/// Builder for OpenAiImageProvider.
#[derive(Debug, Clone)]
pub struct OpenAiImageProviderBuilder {
    model: OpenAiImageModel,
    base_url: String,
}

impl Default for OpenAiImageProviderBuilder {
    fn default() -> Self {
        Self {
            model: OpenAiImageModel::default(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl OpenAiImageProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the model variant.
    pub fn model(mut self, model: OpenAiImageModel) -> Self {
        self.model = model;
        self
    }

    /// Overrides the API base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Builds the provider.
    pub fn build(self) -> OpenAiImageProvider {
        OpenAiImageProvider {
            client: reqwest::Client::new(),
            model: self.model,
            base_url: self.base_url,
        }
    }
}

/// OpenAI image generation provider. Returns a remote URL.
pub struct OpenAiImageProvider {
    client: reqwest::Client,
    model: OpenAiImageModel,
    base_url: String,
}

impl OpenAiImageProvider {
    /// Creates a new `OpenAiImageProviderBuilder`.
    pub fn builder() -> OpenAiImageProviderBuilder {
        OpenAiImageProviderBuilder::new()
    }
}

#[async_trait]
impl ImageProvider for OpenAiImageProvider {
    async fn generate(
        &self,
        request: &GenerationRequest,
        credential: Option<&Credential>,
    ) -> Result<RawImage> {
        let key = require_credential(self.name(), credential)?;
        let body = OpenAiRequest::from_generation_request(request, &self.model);

        let response = self
            .client
            .post(format!("{}/v1/images/generations", self.base_url))
            .bearer_auth(key.expose())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(ArenaError::from_response(
                "OpenAI",
                status.as_u16(),
                &text,
                &headers,
            ));
        }

        let parsed: OpenAiResponse = response.json().await?;
        let image = parsed.data.into_iter().next().ok_or_else(|| {
            ArenaError::UnexpectedResponse("No image in OpenAI response".into())
        })?;

        if let Some(url) = image.url {
            Ok(RawImage::Url(url))
        } else if let Some(b64) = image.b64_json {
            RawImage::from_base64(&b64)
        } else {
            Err(ArenaError::UnexpectedResponse(
                "OpenAI response contained no image data".into(),
            ))
        }
    }

    fn name(&self) -> &str {
        ImageProviderKind::OpenAI.as_str()
    }

    fn display_name(&self) -> &str {
        ImageProviderKind::OpenAI.display_name()
    }
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    prompt: String,
    n: u32,
    size: String,
    quality: String,
}

impl OpenAiRequest {
    fn from_generation_request(req: &GenerationRequest, model: &OpenAiImageModel) -> Self {
        let (width, height) = req.options.size_or((1024, 1024));
        Self {
            model: model.as_str().to_string(),
            prompt: req.prompt.clone(),
            n: 1,
            size: format!("{width}x{height}"),
            quality: "standard".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiImageData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiImageData {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    #[test]
    fn test_request_construction() {
        let req = GenerationRequest::new("A fox");
        let body = OpenAiRequest::from_generation_request(&req, &OpenAiImageModel::DallE3);
        assert_eq!(body.model, "dall-e-3");
        assert_eq!(body.size, "1024x1024");
        assert_eq!(body.n, 1);

        let req = GenerationRequest::new("A fox").with_size(1792, 1024);
        let body = OpenAiRequest::from_generation_request(&req, &OpenAiImageModel::DallE3);
        assert_eq!(body.size, "1792x1024");
    }

    #[tokio::test]
    async fn test_generate_returns_url() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/images/generations")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "dall-e-3",
                "prompt": "A fox"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":[{"url":"https://oai.example/fox.png"}]}"#)
            .create_async()
            .await;

        let provider = OpenAiImageProvider::builder().base_url(server.url()).build();
        let key = Credential::new("sk-test");
        let image = provider
            .generate(&GenerationRequest::new("A fox"), Some(&key))
            .await
            .unwrap();
        assert_eq!(image, RawImage::Url("https://oai.example/fox.png".into()));
    }

    #[tokio::test]
    async fn test_generate_maps_auth_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/images/generations")
            .with_status(401)
            .with_body(r#"{"error":{"message":"Incorrect API key"}}"#)
            .create_async()
            .await;

        let provider = OpenAiImageProvider::builder().base_url(server.url()).build();
        let key = Credential::new("sk-bad");
        let err = provider
            .generate(&GenerationRequest::new("A fox"), Some(&key))
            .await
            .unwrap_err();
        assert!(matches!(err, ArenaError::Auth(_)));
    }

    #[tokio::test]
    async fn test_generate_without_credential() {
        let provider = OpenAiImageProvider::builder().build();
        let err = provider
            .generate(&GenerationRequest::new("A fox"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ArenaError::Auth(_)));
    }
}
