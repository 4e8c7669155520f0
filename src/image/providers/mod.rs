//! Image generation providers.

#[cfg(feature = "google-image")]
mod google;
#[cfg(feature = "ideogram-image")]
mod ideogram;
#[cfg(feature = "openai-image")]
mod openai;
#[cfg(feature = "recraft-image")]
mod recraft;
#[cfg(feature = "replicate-image")]
mod replicate;

#[cfg(feature = "google-image")]
pub use google::{GoogleImageModel, GoogleImageProvider, GoogleImageProviderBuilder};

#[cfg(feature = "ideogram-image")]
pub use ideogram::{IdeogramProvider, IdeogramProviderBuilder};

#[cfg(feature = "openai-image")]
pub use openai::{OpenAiImageModel, OpenAiImageProvider, OpenAiImageProviderBuilder};

#[cfg(feature = "recraft-image")]
pub use recraft::{RecraftProvider, RecraftProviderBuilder};

#[cfg(feature = "replicate-image")]
pub use replicate::{
    ReplicateModel, ReplicatePromptEnhancer, ReplicatePromptEnhancerBuilder, ReplicateProvider,
    ReplicateProviderBuilder,
};
