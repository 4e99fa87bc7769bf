//! # Token capability
//!
//! Anything a provider mints is a [`Token`]: the cache and pipelines only
//! ever need to know how much validity it has left. Concrete variants
//! (opaque bearer, artifact-registry credentials, REST config) carry
//! whatever shape a given pipeline actually needs; they are immutable once
//! issued.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Anything returned by a provider that can report its remaining validity.
pub trait Token: fmt::Debug + Send + Sync {
    /// Remaining validity relative to now. Implementations must not return
    /// a negative duration; an already-expired token reports
    /// [`Duration::ZERO`].
    fn duration(&self) -> Duration;

    /// Name of the provider that minted this token, for logs and metrics
    /// only. Never part of the cache key.
    fn provider_name(&self) -> &str;
}

/// A plain bearer token as returned by most OIDC/STS-style exchanges.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub provider: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    #[must_use]
    pub fn new(provider: impl Into<String>, token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            provider: provider.into(),
            token: token.into(),
            expires_at,
        }
    }
}

impl Token for AccessToken {
    fn duration(&self) -> Duration {
        remaining(self.expires_at)
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }
}

/// Credentials for pulling from a cloud artifact registry (container image
/// registry, Helm OCI registry, ...). `username`/`password` follow the
/// Docker-credential-helper convention most registries speak.
#[derive(Debug, Clone)]
pub struct ArtifactRegistryCredentials {
    pub provider: String,
    pub username: String,
    pub password: String,
    pub expires_at: DateTime<Utc>,
}

impl Token for ArtifactRegistryCredentials {
    fn duration(&self) -> Duration {
        remaining(self.expires_at)
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }
}

/// A bundle sufficient to connect to a managed Kubernetes cluster's API
/// server using a bearer token minted from workload identity.
#[derive(Clone)]
pub struct RestConfig {
    pub provider: String,
    pub host: String,
    pub bearer_token: String,
    pub ca_data: Option<Vec<u8>>,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for RestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestConfig")
            .field("provider", &self.provider)
            .field("host", &self.host)
            .field("bearer_token", &"<redacted>")
            .field("ca_data", &self.ca_data.as_ref().map(|d| d.len()))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Token for RestConfig {
    fn duration(&self) -> Duration {
        remaining(self.expires_at)
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }
}

fn remaining(expires_at: DateTime<Utc>) -> Duration {
    let delta = expires_at - Utc::now();
    delta.to_std().unwrap_or(Duration::ZERO)
}
