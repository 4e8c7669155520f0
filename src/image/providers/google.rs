//! Google Imagen provider (Gemini `generateContent` API).

use crate::credentials::Credential;
use crate::error::{ArenaError, Result};
use crate::image::provider::{require_credential, ImageProvider};
use crate::image::types::{GenerationRequest, ImageProviderKind, RawImage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google image model variants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GoogleImageModel {
    /// Imagen 3.
    #[default]
    Imagen3,
    /// Gemini 2.5 Flash Image.
    GeminiFlashImage,
    /// Any other model identifier.
    Custom(String),
}

impl GoogleImageModel {
    /// Returns the API model identifier.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Imagen3 => "imagen-3.0",
            Self::GeminiFlashImage => "gemini-2.5-flash-image",
            Self::Custom(id) => id,
        }
    }
}

/// Builder for GoogleImageProvider.
#[derive(Debug, Clone)]
pub struct GoogleImageProviderBuilder {
    model: GoogleImageModel,
    base_url: String,
}

impl Default for GoogleImageProviderBuilder {
    fn default() -> Self {
        Self {
            model: GoogleImageModel::default(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl GoogleImageProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the model variant.
    pub fn model(mut self, model: GoogleImageModel) -> Self {
        self.model = model;
        self
    }

    /// Overrides the API base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Builds the provider.
    pub fn build(self) -> GoogleImageProvider {
        GoogleImageProvider {
            client: reqwest::Client::new(),
            model: self.model,
            base_url: self.base_url,
        }
    }
}

/// Google Imagen provider. Returns inline image bytes.
pub struct GoogleImageProvider {
    client: reqwest::Client,
    model: GoogleImageModel,
    base_url: String,
}

impl GoogleImageProvider {
    /// Creates a new `GoogleImageProviderBuilder`.
    pub fn builder() -> GoogleImageProviderBuilder {
        GoogleImageProviderBuilder::new()
    }
}

#[async_trait]
impl ImageProvider for GoogleImageProvider {
    async fn generate(
        &self,
        request: &GenerationRequest,
        credential: Option<&Credential>,
    ) -> Result<RawImage> {
        let key = require_credential(self.name(), credential)?;
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url,
            self.model.as_str()
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", key.expose())
            .json(&GoogleRequest::from_generation_request(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(ArenaError::from_response(
                "Google",
                status.as_u16(),
                &text,
                &headers,
            ));
        }

        let parsed: GoogleResponse = response.json().await?;

        if let Some(reason) = parsed
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return Err(ArenaError::ContentBlocked(format!(
                "prompt blocked: {reason}"
            )));
        }

        let inline = parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|content| content.parts)
            .find_map(|part| part.inline_data)
            .ok_or_else(|| {
                ArenaError::UnexpectedResponse("No image data found in the response".into())
            })?;

        RawImage::from_base64(&inline.data)
    }

    fn name(&self) -> &str {
        ImageProviderKind::Google.as_str()
    }

    fn display_name(&self) -> &str {
        ImageProviderKind::Google.display_name()
    }
}

#[derive(Debug, Serialize)]
struct GoogleRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
struct TextPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

impl GoogleRequest {
    fn from_generation_request(req: &GenerationRequest) -> Self {
        Self {
            contents: vec![Content {
                role: "user",
                parts: vec![TextPart {
                    text: req.prompt.clone(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.4,
                top_p: 1.0,
                top_k: 32,
                seed: req.options.seed,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}
