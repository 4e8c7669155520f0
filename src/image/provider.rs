//! Image provider trait and utilities.

use crate::credentials::Credential;
use crate::error::{ArenaError, Result};
use crate::image::types::{GenerationRequest, RawImage, RawResult};
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;

/// Trait for image generation providers.
///
/// Implementations only describe how to talk to one external generator.
/// Dispatch code calls them through [`ImageProviderExt::invoke`], which
/// turns every failure into a [`RawResult::Failure`].
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Generates one image from the given request.
    async fn generate(
        &self,
        request: &GenerationRequest,
        credential: Option<&Credential>,
    ) -> Result<RawImage>;

    /// Returns the registry name of this provider (e.g. `"openai"`).
    fn name(&self) -> &str;

    /// Returns the name of this provider for display.
    fn display_name(&self) -> &str {
        self.name()
    }

    /// Whether a credential must be present before this provider is called.
    fn requires_credential(&self) -> bool {
        true
    }
}

/// Extension trait adding retries and failure capture to every provider.
#[async_trait]
pub trait ImageProviderExt: ImageProvider {
    /// Generates with automatic retries on transient failures.
    async fn generate_with_retries(
        &self,
        request: &GenerationRequest,
        credential: Option<&Credential>,
        max_retries: u32,
    ) -> Result<RawImage> {
        let mut attempt = 0;
        loop {
            match self.generate(request, credential).await {
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    let delay = e.retry_after().unwrap_or(std::time::Duration::from_secs(1));
                    attempt += 1;
                    tracing::warn!(
                        provider = self.name(),
                        attempt,
                        max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after transient error: {e}"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    /// Invokes the provider and captures any failure, including a panic,
    /// as [`RawResult::Failure`].
    async fn invoke(
        &self,
        request: &GenerationRequest,
        credential: Option<&Credential>,
        max_retries: u32,
    ) -> RawResult {
        let call = self.generate_with_retries(request, credential, max_retries);
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) => RawResult::from(result),
            Err(_) => {
                tracing::error!(provider = self.name(), "provider panicked during generation");
                RawResult::Failure(format!("{} provider panicked", self.name()))
            }
        }
    }
}

impl<T: ImageProvider + ?Sized> ImageProviderExt for T {}

/// Returns the credential or an auth error naming the provider.
pub(crate) fn require_credential<'a>(
    provider: &str,
    credential: Option<&'a Credential>,
) -> Result<&'a Credential> {
    credential.ok_or_else(|| ArenaError::Auth(format!("no API key configured for {provider}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Flaky {
        calls: AtomicU32,
        fail_times: u32,
    }

    #[async_trait]
    impl ImageProvider for Flaky {
        async fn generate(
            &self,
            _request: &GenerationRequest,
            _credential: Option<&Credential>,
        ) -> Result<RawImage> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(ArenaError::RateLimited {
                    retry_after: Some(Duration::from_millis(10)),
                })
            } else {
                Ok(RawImage::Url("https://img.example/1.png".into()))
            }
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    struct Panics;

    #[async_trait]
    impl ImageProvider for Panics {
        async fn generate(
            &self,
            _request: &GenerationRequest,
            _credential: Option<&Credential>,
        ) -> Result<RawImage> {
            panic!("boom")
        }

        fn name(&self) -> &str {
            "panics"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_errors() {
        let provider = Flaky {
            calls: AtomicU32::new(0),
            fail_times: 2,
        };
        let request = GenerationRequest::new("a lighthouse");
        let result = provider.invoke(&request, None, 2).await;
        assert_eq!(result, RawResult::ImageUrl("https://img.example/1.png".into()));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let provider = Flaky {
            calls: AtomicU32::new(0),
            fail_times: 5,
        };
        let request = GenerationRequest::new("a lighthouse");
        let result = provider.invoke(&request, None, 1).await;
        assert!(result.is_failure());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invoke_captures_panic() {
        let request = GenerationRequest::new("a lighthouse");
        let result = Panics.invoke(&request, None, 0).await;
        assert_eq!(result, RawResult::Failure("panics provider panicked".into()));
    }

    #[test]
    fn test_require_credential() {
        assert!(matches!(
            require_credential("openai", None),
            Err(ArenaError::Auth(_))
        ));
        let key = Credential::new("k");
        assert_eq!(require_credential("openai", Some(&key)).unwrap().expose(), "k");
    }
}
