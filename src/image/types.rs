//! Core types for image generation.

use crate::error::{ArenaError, Result};
use serde::{Deserialize, Serialize};

/// Supported image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG format (lossless).
    #[default]
    Png,
    /// JPEG format (lossy).
    Jpeg,
    /// WebP format (modern, efficient).
    WebP,
}

impl ImageFormat {
    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::WebP => "webp",
        }
    }

    /// Attempts to detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::WebP),
            _ => None,
        }
    }

    /// Detects image format from magic bytes.
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 12 {
            return None;
        }

        // PNG: 89 50 4E 47 0D 0A 1A 0A
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(Self::Png);
        }

        // JPEG: FF D8 FF
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(Self::Jpeg);
        }

        // WebP: RIFF....WEBP
        if data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
            return Some(Self::WebP);
        }

        None
    }
}

/// Built-in image provider kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageProviderKind {
    /// OpenAI DALL-E 3.
    OpenAI,
    /// Google Imagen through the Gemini API.
    Google,
    /// Recraft AI.
    Recraft,
    /// Ideogram.
    Ideogram,
    /// Models hosted on Replicate.
    Replicate,
}

impl ImageProviderKind {
    /// Returns the registry name used in selections and slot labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Google => "google",
            Self::Recraft => "recraft",
            Self::Ideogram => "ideogram",
            Self::Replicate => "replicate",
        }
    }

    /// Returns a human-readable provider name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::OpenAI => "OpenAI DALL-E 3",
            Self::Google => "Google Imagen 3",
            Self::Recraft => "Recraft AI",
            Self::Ideogram => "Ideogram v2",
            Self::Replicate => "Replicate",
        }
    }

    /// Environment variable a host conventionally reads the API key from.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::OpenAI => "OPENAI_API_KEY",
            Self::Google => "GOOGLE_API_KEY",
            Self::Recraft => "RECRAFT_API_KEY",
            Self::Ideogram => "IDEOGRAM_API_KEY",
            Self::Replicate => "REPLICATE_API_TOKEN",
        }
    }
}

impl std::fmt::Display for ImageProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common aspect ratios for image generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    /// 1:1 square aspect ratio.
    #[serde(rename = "1:1")]
    Square,
    /// 16:9 landscape (widescreen) aspect ratio.
    #[serde(rename = "16:9")]
    Landscape,
    /// 9:16 portrait (tall) aspect ratio.
    #[serde(rename = "9:16")]
    Portrait,
    /// 4:3 standard landscape aspect ratio.
    #[serde(rename = "4:3")]
    Standard,
    /// 3:4 standard portrait aspect ratio.
    #[serde(rename = "3:4")]
    StandardPortrait,
}

impl AspectRatio {
    /// Returns the aspect ratio as a string (e.g., "16:9").
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Landscape => "16:9",
            Self::Portrait => "9:16",
            Self::Standard => "4:3",
            Self::StandardPortrait => "3:4",
        }
    }

    /// Parses a ratio string such as "16:9".
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "1:1" => Some(Self::Square),
            "16:9" => Some(Self::Landscape),
            "9:16" => Some(Self::Portrait),
            "4:3" => Some(Self::Standard),
            "3:4" => Some(Self::StandardPortrait),
            _ => None,
        }
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Provider-independent generation options.
///
/// Adapters ignore options their API has no equivalent for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Desired width in pixels.
    pub width: Option<u32>,
    /// Desired height in pixels.
    pub height: Option<u32>,
    /// Seed for deterministic generation.
    pub seed: Option<u64>,
    /// Aspect ratio (alternative to width/height).
    pub aspect_ratio: Option<AspectRatio>,
}

impl GenerationOptions {
    /// Returns the requested size, falling back to the given default.
    pub fn size_or(&self, default: (u32, u32)) -> (u32, u32) {
        match (self.width, self.height) {
            (Some(w), Some(h)) => (w, h),
            _ => default,
        }
    }
}

/// A request to generate one image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The text prompt describing the desired image.
    pub prompt: String,
    /// Generation options shared by every task of a batch.
    #[serde(default)]
    pub options: GenerationOptions,
}

impl GenerationRequest {
    /// Creates a new request with the given prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            options: GenerationOptions::default(),
        }
    }

    /// Sets the generation options.
    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the desired dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.options.width = Some(width);
        self.options.height = Some(height);
        self
    }

    /// Sets the seed for deterministic generation.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.options.seed = Some(seed);
        self
    }

    /// Sets the aspect ratio.
    pub fn with_aspect_ratio(mut self, ratio: AspectRatio) -> Self {
        self.options.aspect_ratio = Some(ratio);
        self
    }
}

/// A successfully generated image, as the provider handed it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawImage {
    /// Image bytes returned inline.
    Bytes(Vec<u8>),
    /// Remote URL the image can be downloaded from.
    Url(String),
}

impl RawImage {
    /// Returns true if the payload carries no image at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Bytes(data) => data.is_empty(),
            Self::Url(url) => url.trim().is_empty(),
        }
    }

    /// Detects the image format for inline bytes, or from a URL's extension.
    pub fn format(&self) -> Option<ImageFormat> {
        match self {
            Self::Bytes(data) => ImageFormat::from_magic_bytes(data),
            Self::Url(url) => url
                .split(['?', '#'])
                .next()
                .and_then(|path| path.rsplit('.').next())
                .and_then(ImageFormat::from_extension),
        }
    }

    /// Decodes a base64 payload into inline bytes.
    pub fn from_base64(b64: &str) -> Result<Self> {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(b64.trim())
            .map(Self::Bytes)
            .map_err(|e| ArenaError::Decode(e.to_string()))
    }
}

/// Raw outcome of one provider invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawResult {
    /// Image bytes returned inline.
    ImageBytes(Vec<u8>),
    /// Remote image URL.
    ImageUrl(String),
    /// Any failure, captured as a message.
    Failure(String),
}

impl RawResult {
    /// Returns true for [`RawResult::Failure`].
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

impl From<RawImage> for RawResult {
    fn from(image: RawImage) -> Self {
        match image {
            RawImage::Bytes(data) => Self::ImageBytes(data),
            RawImage::Url(url) => Self::ImageUrl(url),
        }
    }
}

impl From<Result<RawImage>> for RawResult {
    fn from(result: Result<RawImage>) -> Self {
        match result {
            Ok(image) if image.is_empty() => {
                Self::Failure("provider returned an empty image".into())
            }
            Ok(image) => image.into(),
            Err(e) => Self::Failure(e.to_string()),
        }
    }
}
