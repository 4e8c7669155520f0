//! Image generation module.

mod provider;
pub mod providers;
mod types;

pub use provider::{ImageProvider, ImageProviderExt};
pub use types::{
    AspectRatio, GenerationOptions, GenerationRequest, ImageFormat, ImageProviderKind, RawImage,
    RawResult,
};
