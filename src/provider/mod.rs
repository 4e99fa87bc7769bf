//! # Provider interface
//!
//! The capability surface every cloud plugin implements (§4.4). One
//! mandatory [`Provider`] trait covers the flows every plugin must
//! support; three optional capability traits
//! ([`ImpersonationCapable`], [`ArtifactRegistryCapable`],
//! [`ClusterConfigCapable`]) are advertised through accessor methods on
//! [`CapabilityProvider`] rather than growing one trait with
//! provider-specific methods every plugin must stub out — see
//! `CapabilityProvider`'s own doc comment for why this crate uses accessor
//! methods instead of `Any::downcast`.
//!
//! Concrete wire protocols (AWS STS, GCP STS/IAM Credentials, Azure AAD,
//! GitHub App JWT exchange) are out of scope; this module defines only the
//! shape a plugin must satisfy.

use std::sync::Arc;

use async_trait::async_trait;

use crate::options::Options;
use crate::serviceaccount::ImpersonationIdentity;
use crate::token::{AccessToken, ArtifactRegistryCredentials, RestConfig};

/// Mandatory capability set every provider plugin exposes.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Used as the key-space prefix in cache-key derivation.
    fn get_name(&self) -> &str;

    /// Mint a token from the process's own ambient identity (environment,
    /// metadata service, or workload identity federation of the
    /// controller's own pod), bypassing any per-object service account.
    async fn new_controller_token(&self, opts: &Options) -> anyhow::Result<AccessToken>;

    /// Audiences to request in the Kubernetes `TokenRequest` for the given
    /// service account.
    async fn get_audiences(
        &self,
        service_account: &k8s_openapi::api::core::v1::ServiceAccount,
    ) -> anyhow::Result<Vec<String>>;

    /// Parse provider-specific annotations on the service account to
    /// extract an identity handle. An empty string means "no
    /// impersonation needed".
    fn get_identity(&self, service_account: &k8s_openapi::api::core::v1::ServiceAccount) -> String;

    /// Exchange a Kubernetes-issued OIDC token for a provider access
    /// token.
    async fn new_token_for_service_account(
        &self,
        oidc_token: &str,
        service_account: &k8s_openapi::api::core::v1::ServiceAccount,
        opts: &Options,
    ) -> anyhow::Result<AccessToken>;
}

/// Optional: providers whose identity model supports impersonating a
/// second identity on top of the base token (e.g. a GCP service account
/// impersonating another, or AWS role chaining).
#[async_trait]
pub trait ImpersonationCapable: Provider {
    /// The fully-qualified annotation key that carries the impersonation
    /// target on a service account, e.g. `iam.gke.io/gcp-service-account`.
    fn get_impersonation_annotation_key(&self) -> &str;

    /// Parse the annotation's raw JSON payload into an opaque identity
    /// handle.
    fn get_identity_for_impersonation(
        &self,
        raw_json: &str,
    ) -> anyhow::Result<Arc<dyn ImpersonationIdentity>>;

    /// Exchange a base token plus an impersonation identity for the final
    /// token acting as that identity.
    async fn new_token_for_identity(
        &self,
        base_token: &AccessToken,
        identity: &dyn ImpersonationIdentity,
        opts: &Options,
    ) -> anyhow::Result<AccessToken>;
}

/// Optional: providers that can mint artifact-registry (container/Helm
/// OCI registry) pull credentials.
#[async_trait]
pub trait ArtifactRegistryCapable: Provider {
    /// Extra access-token options to request when acquiring the access
    /// token that will be exchanged for registry credentials (e.g. a
    /// region derived from the repository host).
    fn get_access_token_options_for_artifact_repository(
        &self,
        repository: &str,
    ) -> anyhow::Result<Vec<crate::options::OptionFn>>;

    /// Canonicalise a repository reference into the string used verbatim
    /// in the registry-credentials cache key. Fails on malformed input.
    fn parse_artifact_repository(&self, repository: &str) -> anyhow::Result<String>;

    /// Exchange an access token for registry pull credentials.
    async fn new_artifact_registry_credentials(
        &self,
        registry_input: &str,
        access_token: &AccessToken,
        opts: &Options,
    ) -> anyhow::Result<ArtifactRegistryCredentials>;
}

/// Optional: providers that can assemble a REST config for connecting to
/// a managed Kubernetes cluster under workload identity.
#[async_trait]
pub trait ClusterConfigCapable: Provider {
    /// One set of extra access-token options per access token the
    /// provider needs (e.g. EKS needs one; GKE may need two).
    fn get_access_token_options_for_cluster(
        &self,
        opts: &Options,
    ) -> anyhow::Result<Vec<Vec<crate::options::OptionFn>>>;

    /// Assemble the final `RestConfig` from the ordered list of acquired
    /// access tokens.
    async fn new_rest_config(
        &self,
        access_tokens: &[AccessToken],
        opts: &Options,
    ) -> anyhow::Result<RestConfig>;
}

/// The trait object pipelines actually hold. Rust trait objects cannot be
/// downcast from one trait to an unrelated one (unlike a `dyn Any`-keyed
/// capability lookup in languages with runtime type tags), so optional
/// capabilities are advertised as accessor methods a concrete provider
/// overrides when it implements them, rather than via `Any::downcast`.
/// Every default returns `None`; a provider plugin that also implements
/// e.g. [`ImpersonationCapable`] overrides `as_impersonation_capable` to
/// return `Some(self)`.
pub trait CapabilityProvider: Provider {
    fn as_impersonation_capable(&self) -> Option<&dyn ImpersonationCapable> {
        None
    }

    fn as_artifact_registry_capable(&self) -> Option<&dyn ArtifactRegistryCapable> {
        None
    }

    fn as_cluster_config_capable(&self) -> Option<&dyn ClusterConfigCapable> {
        None
    }
}

/// A process-wide registry resolving a provider plugin by [`Provider::get_name`]
/// (design notes, §9: "a registry keyed by provider name resolves the
/// concrete implementation at request time"). A host process registers
/// each provider it supports once at startup; callers that only know a
/// provider's name at request time (e.g. a CRD field naming `"aws"` or
/// `"gcp"`) look it up here instead of threading a concrete type through
/// the reconciler.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: std::collections::HashMap<String, Arc<dyn CapabilityProvider>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` under its own [`Provider::get_name`]. Replaces
    /// any provider previously registered under the same name.
    pub fn register(&mut self, provider: Arc<dyn CapabilityProvider>) {
        self.providers.insert(provider.get_name().to_string(), provider);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn CapabilityProvider>> {
        self.providers.get(name).cloned()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}
