#![warn(missing_docs)]
//! GenViz Arena - fan one prompt out to many AI image providers at once.
//!
//! A [`DispatchCoordinator`] expands a [`BatchRequest`] into one task per
//! (provider, repeat) pair and runs them on a bounded pool. Results stream
//! into the batch as they arrive; a failing or slow provider never holds
//! back the others. A finished batch can be ranked blind with a
//! [`RankingSession`].
//!
//! # Quick Start
//!
//! ```no_run
//! use genviz_arena::{BatchRequest, CredentialSet, DispatchCoordinator, OpenAiImageProvider};
//! use genviz_arena::{RankingSession, ReplicateModel, ReplicateProvider};
//!
//! #[tokio::main]
//! async fn main() -> genviz_arena::Result<()> {
//!     let coordinator = DispatchCoordinator::builder()
//!         .provider(OpenAiImageProvider::builder().build())
//!         .provider(ReplicateProvider::builder().model(ReplicateModel::FluxSchnell).build())
//!         .build()?;
//!
//!     let credentials = CredentialSet::new()
//!         .with("openai", std::env::var("OPENAI_API_KEY").unwrap_or_default())
//!         .with("flux-schnell", std::env::var("REPLICATE_API_TOKEN").unwrap_or_default());
//!
//!     let request = BatchRequest::new("A lighthouse at dusk, oil painting")
//!         .select("openai", 1)
//!         .select("flux-schnell", 2)
//!         .arena(true);
//!     let batch = coordinator.submit_batch(request, &credentials)?;
//!     batch.wait().await;
//!
//!     let mut session = RankingSession::open(&batch)?;
//!     if let Some(second) = session.order().get(1).cloned() {
//!         session.move_up(&second)?;
//!     }
//!     for (rank, slot) in session.submit()?.iter().enumerate() {
//!         println!("{}. {}", rank + 1, slot);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! ## Image Providers
//! - `openai-image`: OpenAI DALL-E 3
//! - `google-image`: Google Imagen 3
//! - `recraft-image`: Recraft AI
//! - `ideogram-image`: Ideogram v2
//! - `replicate-image`: Replicate-hosted models (Flux Schnell, Recraft v3, Imagen 3, Ideogram v2a)
//!   and the Claude-backed prompt enhancer
//!
//! ## Meta Features
//! - `providers`: All image providers
//! - `cli`: Command-line interface

mod error;

pub mod aggregate;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod enhance;
pub mod image;
pub mod ranking;

// Re-export error types at crate root
pub use error::{ArenaError, Result};

pub use aggregate::{GenerationResult, Insertion, ResultAggregator};
pub use config::DispatchConfig;
pub use credentials::{Credential, CredentialSet};
pub use enhance::PromptEnhancer;
pub use dispatch::{
    Batch, BatchRequest, BatchSnapshot, BatchStatus, DispatchCoordinator,
    DispatchCoordinatorBuilder, GenerationTask, ResultSink, TaskId, TaskStatus,
};
pub use image::{
    AspectRatio, GenerationOptions, GenerationRequest, ImageFormat, ImageProvider,
    ImageProviderExt, ImageProviderKind, RawImage, RawResult,
};
pub use ranking::{RankingEntry, RankingSession};

#[cfg(feature = "openai-image")]
pub use image::providers::{OpenAiImageModel, OpenAiImageProvider, OpenAiImageProviderBuilder};

#[cfg(feature = "google-image")]
pub use image::providers::{GoogleImageModel, GoogleImageProvider, GoogleImageProviderBuilder};

#[cfg(feature = "recraft-image")]
pub use image::providers::{RecraftProvider, RecraftProviderBuilder};

#[cfg(feature = "ideogram-image")]
pub use image::providers::{IdeogramProvider, IdeogramProviderBuilder};

#[cfg(feature = "replicate-image")]
pub use image::providers::{
    ReplicateModel, ReplicatePromptEnhancer, ReplicatePromptEnhancerBuilder, ReplicateProvider,
    ReplicateProviderBuilder,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{ArenaError, Result};

    pub use crate::credentials::CredentialSet;
    pub use crate::dispatch::{Batch, BatchRequest, DispatchCoordinator, TaskStatus};
    pub use crate::image::{GenerationRequest, ImageProvider, ImageProviderExt, RawImage};
    pub use crate::ranking::RankingSession;

    #[cfg(feature = "openai-image")]
    pub use crate::image::providers::OpenAiImageProvider;

    #[cfg(feature = "google-image")]
    pub use crate::image::providers::GoogleImageProvider;

    #[cfg(feature = "recraft-image")]
    pub use crate::image::providers::RecraftProvider;

    #[cfg(feature = "ideogram-image")]
    pub use crate::image::providers::IdeogramProvider;

    #[cfg(feature = "replicate-image")]
    pub use crate::image::providers::ReplicateProvider;
}
