//! Provider credentials, resolved by the host before a batch is submitted.

use std::collections::HashMap;
use std::fmt;

/// An opaque provider credential (API key or token).
///
/// The `Debug` impl never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wraps a secret value.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Returns the secret for use in a request header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Credentials keyed by provider name.
///
/// Read-only while a batch runs; shared across all of its tasks.
#[derive(Debug, Clone, Default)]
pub struct CredentialSet {
    keys: HashMap<String, Credential>,
}

impl CredentialSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a credential, builder style. Blank secrets are ignored.
    pub fn with(mut self, provider: impl Into<String>, secret: impl Into<String>) -> Self {
        self.insert(provider, secret);
        self
    }

    /// Adds or replaces a credential. Blank secrets are ignored.
    pub fn insert(&mut self, provider: impl Into<String>, secret: impl Into<String>) {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return;
        }
        self.keys
            .insert(provider.into(), Credential::new(secret.trim().to_string()));
    }

    /// Returns the credential for a provider.
    pub fn get(&self, provider: &str) -> Option<&Credential> {
        self.keys.get(provider)
    }

    /// Returns true if a credential is configured for the provider.
    pub fn contains(&self, provider: &str) -> bool {
        self.keys.contains_key(provider)
    }

    /// Provider names with a configured credential.
    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    /// Returns true when no credential is configured.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
