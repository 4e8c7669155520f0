//! Replicate-hosted image models and prompt enhancement.

use crate::credentials::Credential;
use crate::error::{ArenaError, Result};
use crate::enhance::{enhancement_instructions, PromptEnhancer, ENHANCER_SYSTEM_PROMPT};
use crate::image::provider::{require_credential, ImageProvider};
use crate::image::types::{GenerationRequest, RawImage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const DEFAULT_BASE_URL: &str = "https://api.replicate.com";

/// Image models available on Replicate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ReplicateModel {
    /// Black Forest Labs Flux Schnell.
    #[default]
    FluxSchnell,
    /// Recraft v3.
    RecraftV3,
    /// Google Imagen 3.
    Imagen3,
    /// Ideogram v2a turbo.
    IdeogramV2aTurbo,
    /// Any `owner/name` or `owner/name:version` reference.
    Custom(String),
}

impl ReplicateModel {
    /// Returns the Replicate model reference.
    pub fn reference(&self) -> &str {
        match self {
            Self::FluxSchnell => "black-forest-labs/flux-schnell",
            Self::RecraftV3 => "recraft-ai/recraft-v3",
            Self::Imagen3 => "google/imagen-3",
            Self::IdeogramV2aTurbo => "ideogram-ai/ideogram-v2a-turbo",
            Self::Custom(reference) => reference,
        }
    }

    /// Returns the default registry name for this model.
    pub fn default_name(&self) -> String {
        match self {
            Self::FluxSchnell => "flux-schnell".into(),
            Self::RecraftV3 => "recraft-v3".into(),
            Self::Imagen3 => "imagen-3".into(),
            Self::IdeogramV2aTurbo => "ideogram-v2a-turbo".into(),
            Self::Custom(reference) => reference
                .split(':')
                .next()
                .and_then(|path| path.rsplit('/').next())
                .unwrap_or(reference)
                .to_string(),
        }
    }

    /// Parses a short model name or a full reference.
    pub fn parse(value: &str) -> Self {
        match value {
            "flux-schnell" => Self::FluxSchnell,
            "recraft-v3" => Self::RecraftV3,
            "imagen-3" => Self::Imagen3,
            "ideogram-v2a-turbo" => Self::IdeogramV2aTurbo,
            other => Self::Custom(other.to_string()),
        }
    }
}

/// Builder for ReplicateProvider.
#[derive(Debug, Clone)]
pub struct ReplicateProviderBuilder {
    model: ReplicateModel,
    name: Option<String>,
    base_url: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl Default for ReplicateProviderBuilder {
    fn default() -> Self {
        Self {
            model: ReplicateModel::default(),
            name: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: Duration::from_millis(1000),
            timeout: Duration::from_secs(180),
        }
    }
}

impl ReplicateProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the hosted model.
    pub fn model(mut self, model: ReplicateModel) -> Self {
        self.model = model;
        self
    }

    /// Overrides the registry name (defaults to the model's short name).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Overrides the API base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the interval between prediction status polls.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the polling ceiling for a single prediction.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the provider.
    pub fn build(self) -> ReplicateProvider {
        let name = self.name.unwrap_or_else(|| self.model.default_name());
        ReplicateProvider {
            predictions: Predictions::new(self.base_url, self.poll_interval, self.timeout),
            name,
            model: self.model,
        }
    }
}

/// Provider for one Replicate-hosted model. Returns a remote URL.
pub struct ReplicateProvider {
    predictions: Predictions,
    name: String,
    model: ReplicateModel,
}

impl ReplicateProvider {
    /// Creates a new `ReplicateProviderBuilder`.
    pub fn builder() -> ReplicateProviderBuilder {
        ReplicateProviderBuilder::new()
    }
}

#[async_trait]
impl ImageProvider for ReplicateProvider {
    async fn generate(
        &self,
        request: &GenerationRequest,
        credential: Option<&Credential>,
    ) -> Result<RawImage> {
        let token = require_credential(&self.name, credential)?.expose();
        let input = ImageInput {
            prompt: &request.prompt,
            seed: request.options.seed,
            aspect_ratio: request.options.aspect_ratio.map(|ar| ar.as_str()),
        };

        let prediction = self
            .predictions
            .run(&self.name, self.model.reference(), &input, token)
            .await?;

        prediction
            .first_output()
            .map(RawImage::Url)
            .ok_or_else(|| ArenaError::UnexpectedResponse("Model returned empty result".into()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Default language model used to enhance prompts.
const DEFAULT_ENHANCER_MODEL: &str = "anthropic/claude-3.7-sonnet";

/// Builder for ReplicatePromptEnhancer.
#[derive(Debug, Clone)]
pub struct ReplicatePromptEnhancerBuilder {
    model: String,
    base_url: String,
    temperature: f32,
    max_tokens: u32,
    poll_interval: Duration,
    timeout: Duration,
}

impl Default for ReplicatePromptEnhancerBuilder {
    fn default() -> Self {
        Self {
            model: DEFAULT_ENHANCER_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: 0.7,
            max_tokens: 10_500,
            poll_interval: Duration::from_millis(1000),
            timeout: Duration::from_secs(120),
        }
    }
}

impl ReplicatePromptEnhancerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the language model reference (`owner/name`).
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Overrides the API base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the sampling temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the interval between prediction status polls.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the polling ceiling.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the enhancer.
    pub fn build(self) -> ReplicatePromptEnhancer {
        ReplicatePromptEnhancer {
            predictions: Predictions::new(self.base_url, self.poll_interval, self.timeout),
            model: self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Rewrites prompts with a language model hosted on Replicate.
pub struct ReplicatePromptEnhancer {
    predictions: Predictions,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ReplicatePromptEnhancer {
    /// Creates a new `ReplicatePromptEnhancerBuilder`.
    pub fn builder() -> ReplicatePromptEnhancerBuilder {
        ReplicatePromptEnhancerBuilder::new()
    }
}

#[async_trait]
impl PromptEnhancer for ReplicatePromptEnhancer {
    async fn enhance(&self, prompt: &str, credential: Option<&Credential>) -> Result<String> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ArenaError::Validation("prompt must not be empty".into()));
        }
        let token = require_credential("Replicate", credential)?.expose();

        let instructions = enhancement_instructions(prompt);
        let input = EnhanceInput {
            system: ENHANCER_SYSTEM_PROMPT,
            prompt: &instructions,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let prediction = self
            .predictions
            .run("prompt-enhancer", &self.model, &input, token)
            .await?;

        let enhanced = prediction.joined_output();
        let enhanced = enhanced.trim();
        if enhanced.is_empty() {
            tracing::warn!(model = %self.model, "enhancer returned an empty response");
            return Err(ArenaError::UnexpectedResponse(
                "Could not enhance the prompt".into(),
            ));
        }
        tracing::debug!(model = %self.model, chars = enhanced.len(), "prompt enhanced");
        Ok(enhanced.to_string())
    }
}

/// Prediction endpoints shared by every Replicate client.
struct Predictions {
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl Predictions {
    fn new(base_url: String, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            poll_interval,
            timeout,
        }
    }

    /// Creates a prediction, waits for a terminal status and checks it succeeded.
    async fn run<I: Serialize + Sync>(
        &self,
        label: &str,
        reference: &str,
        input: &I,
        token: &str,
    ) -> Result<Prediction> {
        let prediction = self.create(reference, input, token).await?;
        tracing::debug!(provider = label, prediction = %prediction.id, status = %prediction.status, "created prediction");

        let prediction = self.poll_until_done(label, prediction, token).await?;
        match prediction.status.as_str() {
            "succeeded" => Ok(prediction),
            "canceled" => Err(ArenaError::Api {
                status: 500,
                message: "prediction was canceled upstream".into(),
            }),
            _ => {
                let message = prediction.error.unwrap_or_else(|| "Unknown error".into());
                if message.to_lowercase().contains("nsfw") {
                    Err(ArenaError::ContentBlocked(message))
                } else {
                    Err(ArenaError::Api {
                        status: 500,
                        message,
                    })
                }
            }
        }
    }

    async fn create<I: Serialize + Sync>(
        &self,
        reference: &str,
        input: &I,
        token: &str,
    ) -> Result<Prediction> {
        // Versioned references go through the generic predictions endpoint.
        let builder = match reference.split_once(':') {
            Some((_, version)) => self
                .client
                .post(format!("{}/v1/predictions", self.base_url))
                .json(&VersionedPredictionRequest { version, input }),
            None => self
                .client
                .post(format!("{}/v1/models/{}/predictions", self.base_url, reference))
                .json(&PredictionRequest { input }),
        };

        let response = builder
            .bearer_auth(token)
            .header("Prefer", "wait")
            .send()
            .await?;

        read_prediction(response).await
    }

    async fn poll_until_done(
        &self,
        label: &str,
        mut prediction: Prediction,
        token: &str,
    ) -> Result<Prediction> {
        let start = Instant::now();

        while !prediction.is_terminal() {
            if start.elapsed() > self.timeout {
                return Err(ArenaError::Timeout(self.timeout));
            }

            let url = prediction
                .urls
                .as_ref()
                .and_then(|u| u.get.clone())
                .ok_or_else(|| {
                    ArenaError::UnexpectedResponse("prediction has no status URL".into())
                })?;

            tokio::time::sleep(self.poll_interval).await;
            tracing::debug!(provider = label, prediction = %prediction.id, "polling prediction");

            let response = self.client.get(&url).bearer_auth(token).send().await?;
            prediction = read_prediction(response).await?;
        }

        Ok(prediction)
    }
}

async fn read_prediction(response: reqwest::Response) -> Result<Prediction> {
    let status = response.status();
    if !status.is_success() {
        let headers = response.headers().clone();
        let text = response.text().await.unwrap_or_default();
        return Err(ArenaError::from_response(
            "Replicate",
            status.as_u16(),
            &text,
            &headers,
        ));
    }
    Ok(response.json().await?)
}

#[derive(Debug, Serialize)]
struct ImageInput<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aspect_ratio: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct EnhanceInput<'a> {
    system: &'a str,
    prompt: &'a str,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct PredictionRequest<'a, I> {
    input: &'a I,
}

#[derive(Debug, Serialize)]
struct VersionedPredictionRequest<'a, I> {
    version: &'a str,
    input: &'a I,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<PredictionOutput>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    urls: Option<PredictionUrls>,
}

impl Prediction {
    fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "failed" | "canceled")
    }

    fn first_output(self) -> Option<String> {
        let url = match self.output? {
            PredictionOutput::Single(url) => Some(url),
            PredictionOutput::Many(urls) => urls.into_iter().next(),
        };
        url.filter(|url| !url.is_empty())
    }

    /// Language models stream their answer as a list of text chunks.
    fn joined_output(self) -> String {
        match self.output {
            Some(PredictionOutput::Single(text)) => text,
            Some(PredictionOutput::Many(chunks)) => chunks.concat(),
            None => String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PredictionOutput {
    Single(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    #[serde(default)]
    get: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[test]
    fn test_model_names() {
        assert_eq!(ReplicateModel::FluxSchnell.default_name(), "flux-schnell");
        assert_eq!(
            ReplicateModel::parse("nvidia/sana:c6b5d2b7").default_name(),
            "sana"
        );
        assert_eq!(ReplicateModel::parse("imagen-3"), ReplicateModel::Imagen3);
    }

    #[test]
    fn test_output_shapes() {
        let single: Prediction = serde_json::from_str(
            r#"{"id":"a","status":"succeeded","output":"https://r.example/1.webp"}"#,
        )
        .unwrap();
        assert_eq!(single.first_output().as_deref(), Some("https://r.example/1.webp"));

        let many: Prediction = serde_json::from_str(
            r#"{"id":"a","status":"succeeded","output":["https://r.example/2.png"]}"#,
        )
        .unwrap();
        assert_eq!(many.first_output().as_deref(), Some("https://r.example/2.png"));

        let empty: Prediction =
            serde_json::from_str(r#"{"id":"a","status":"succeeded","output":[]}"#).unwrap();
        assert!(empty.first_output().is_none());
    }

    #[tokio::test]
    async fn test_generate_waits_inline() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/models/black-forest-labs/flux-schnell/predictions")
            .match_header("authorization", "Bearer r8-token")
            .match_header("prefer", "wait")
            .with_status(201)
            .with_body(r#"{"id":"p1","status":"succeeded","output":["https://r.example/p1.webp"]}"#)
            .create_async()
            .await;

        let provider = ReplicateProvider::builder().base_url(server.url()).build();
        let token = Credential::new("r8-token");
        let image = provider
            .generate(&GenerationRequest::new("A fox"), Some(&token))
            .await
            .unwrap();
        assert_eq!(image, RawImage::Url("https://r.example/p1.webp".into()));
    }

    #[tokio::test]
    async fn test_generate_polls_until_succeeded() {
        let mut server = Server::new_async().await;
        let status_url = format!("{}/v1/predictions/p2", server.url());
        let _create = server
            .mock("POST", "/v1/models/google/imagen-3/predictions")
            .with_status(201)
            .with_body(format!(
                r#"{{"id":"p2","status":"processing","urls":{{"get":"{status_url}"}}}}"#
            ))
            .create_async()
            .await;
        let _poll = server
            .mock("GET", "/v1/predictions/p2")
            .with_status(200)
            .with_body(r#"{"id":"p2","status":"succeeded","output":"https://r.example/p2.png"}"#)
            .create_async()
            .await;

        let provider = ReplicateProvider::builder()
            .model(ReplicateModel::Imagen3)
            .base_url(server.url())
            .poll_interval(Duration::from_millis(10))
            .build();
        let token = Credential::new("r8-token");
        let image = provider
            .generate(&GenerationRequest::new("A fox"), Some(&token))
            .await
            .unwrap();
        assert_eq!(image, RawImage::Url("https://r.example/p2.png".into()));
        assert_eq!(provider.name(), "imagen-3");
    }

    #[tokio::test]
    async fn test_generate_reports_failed_prediction() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/predictions")
            .with_status(201)
            .with_body(r#"{"id":"p3","status":"failed","error":"CUDA out of memory"}"#)
            .create_async()
            .await;

        let provider = ReplicateProvider::builder()
            .model(ReplicateModel::parse("nvidia/sana:c6b5d2b7"))
            .base_url(server.url())
            .build();
        let token = Credential::new("r8-token");
        let err = provider
            .generate(&GenerationRequest::new("A fox"), Some(&token))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "API error: 500 - CUDA out of memory");
    }

    #[tokio::test]
    async fn test_enhance_joins_streamed_output() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/models/anthropic/claude-3.7-sonnet/predictions")
            .match_header("authorization", "Bearer r8-token")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "input": {
                    "system": ENHANCER_SYSTEM_PROMPT,
                    "temperature": 0.7,
                    "max_tokens": 10500
                }
            })))
            .with_status(201)
            .with_body(
                r#"{"id":"e1","status":"succeeded","output":["A red fox ","in golden ","morning light\n"]}"#,
            )
            .create_async()
            .await;

        let enhancer = ReplicatePromptEnhancer::builder().base_url(server.url()).build();
        let token = Credential::new("r8-token");
        let enhanced = enhancer.enhance("a fox", Some(&token)).await.unwrap();
        assert_eq!(enhanced, "A red fox in golden morning light");
    }

    #[tokio::test]
    async fn test_enhance_rejects_empty_output() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/models/anthropic/claude-3.7-sonnet/predictions")
            .with_status(201)
            .with_body(r#"{"id":"e2","status":"succeeded","output":["", "  "]}"#)
            .create_async()
            .await;

        let enhancer = ReplicatePromptEnhancer::builder().base_url(server.url()).build();
        let token = Credential::new("r8-token");
        let err = enhancer.enhance("a fox", Some(&token)).await.unwrap_err();
        assert!(matches!(err, ArenaError::UnexpectedResponse(_)));
    }

    #[tokio::test]
    async fn test_enhance_needs_prompt_and_token() {
        let enhancer = ReplicatePromptEnhancer::builder()
            .base_url("http://127.0.0.1:9")
            .build();
        let token = Credential::new("r8-token");
        assert!(matches!(
            enhancer.enhance("   ", Some(&token)).await,
            Err(ArenaError::Validation(_))
        ));
        assert!(matches!(
            enhancer.enhance("a fox", None).await,
            Err(ArenaError::Auth(_))
        ));
    }
}
