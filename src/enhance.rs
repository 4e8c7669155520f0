//! Prompt enhancement ahead of a batch.
//!
//! An enhancer rewrites a short prompt into a more descriptive one with a
//! language model. It runs before submission and never touches a batch.

use crate::credentials::Credential;
use crate::error::Result;
use async_trait::async_trait;

/// System prompt handed to the language model.
pub const ENHANCER_SYSTEM_PROMPT: &str =
    "You are a creative assistant that helps enhance text prompts for AI image generation.";

/// Trait for prompt enhancement backends.
#[async_trait]
pub trait PromptEnhancer: Send + Sync {
    /// Returns an enhanced version of `prompt`.
    ///
    /// Fails with [`ArenaError::Validation`](crate::ArenaError::Validation)
    /// on a blank prompt and with
    /// [`ArenaError::UnexpectedResponse`](crate::ArenaError::UnexpectedResponse)
    /// when the model answers with nothing.
    async fn enhance(&self, prompt: &str, credential: Option<&Credential>) -> Result<String>;
}

/// Builds the instruction sent to the model for `prompt`.
pub fn enhancement_instructions(prompt: &str) -> String {
    format!(
        "Here is a user's prompt for AI image generation:\n\
         '{prompt}'\n\
         \n\
         Please enhance this prompt to be more detailed and descriptive. Focus on:\n\
         1. Adding visual details that would help create a better image\n\
         2. Specifying artistic style, lighting, perspective, and composition\n\
         3. Using descriptive adjectives and clear visual language\n\
         \n\
         Keep the essence and main subject of the original prompt intact.\n\
         Return ONLY the enhanced prompt text with no explanations, introductions, or other text."
    )
}
