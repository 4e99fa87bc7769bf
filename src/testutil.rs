//! # Test doubles
//!
//! In-memory [`Provider`]/[`KubernetesCollaborator`] implementations,
//! gated behind the `test-util` feature so downstream crates writing
//! pipeline tests against their own provider can reuse them instead of
//! re-implementing mocks.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use k8s_openapi::api::core::v1::ServiceAccount;

use crate::clusteraddress::parse_cluster_address;
use crate::options::{OptionFn, Options};
use crate::provider::{ArtifactRegistryCapable, CapabilityProvider, ClusterConfigCapable, ImpersonationCapable, Provider};
use crate::serviceaccount::{ImpersonationIdentity, KubernetesCollaborator};
use crate::token::{AccessToken, ArtifactRegistryCredentials, RestConfig};

/// A provider that mints deterministic, short-lived tokens and records
/// every call it receives for assertions. Optional capability support
/// (impersonation, artifact registry, cluster REST config) is always
/// implemented on the type but only *advertised* through
/// [`CapabilityProvider`] when the corresponding `with_*` constructor was
/// used, mirroring how a real provider only implements the optional
/// traits it actually supports.
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    pub controller_token_calls: Mutex<u32>,
    pub exchange_calls: Mutex<u32>,
    pub impersonate_calls: Mutex<u32>,
    pub registry_credential_calls: Mutex<u32>,
    pub cluster_token_option_calls: Mutex<u32>,
    pub rest_config_calls: Mutex<u32>,
    pub fail_exchange: bool,
    supports_impersonation: bool,
    supports_artifact_registry: bool,
    supports_cluster: bool,
    cluster_token_count: usize,
}

/// A deterministic [`ImpersonationIdentity`] for test fixtures.
#[derive(Debug, Clone)]
pub struct MockImpersonationIdentity {
    pub target: String,
    pub use_service_account: bool,
}

impl ImpersonationIdentity for MockImpersonationIdentity {
    fn cache_key_string(&self) -> String {
        self.target.clone()
    }

    fn use_service_account(&self) -> bool {
        self.use_service_account
    }
}

impl MockProvider {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            controller_token_calls: Mutex::new(0),
            exchange_calls: Mutex::new(0),
            impersonate_calls: Mutex::new(0),
            registry_credential_calls: Mutex::new(0),
            cluster_token_option_calls: Mutex::new(0),
            rest_config_calls: Mutex::new(0),
            fail_exchange: false,
            supports_impersonation: false,
            supports_artifact_registry: false,
            supports_cluster: false,
            cluster_token_count: 0,
        }
    }

    #[must_use]
    pub fn failing(name: impl Into<String>) -> Self {
        Self {
            fail_exchange: true,
            ..Self::new(name)
        }
    }

    #[must_use]
    pub fn with_impersonation(name: impl Into<String>) -> Self {
        Self {
            supports_impersonation: true,
            ..Self::new(name)
        }
    }

    #[must_use]
    pub fn with_artifact_registry(name: impl Into<String>) -> Self {
        Self {
            supports_artifact_registry: true,
            ..Self::new(name)
        }
    }

    #[must_use]
    pub fn with_cluster_config(name: impl Into<String>, token_count: usize) -> Self {
        Self {
            supports_cluster: true,
            cluster_token_count: token_count,
            ..Self::new(name)
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn get_name(&self) -> &str {
        &self.name
    }

    async fn new_controller_token(&self, _opts: &Options) -> anyhow::Result<AccessToken> {
        *self.controller_token_calls.lock().expect("lock poisoned") += 1;
        Ok(AccessToken::new(
            self.name.clone(),
            "controller-token",
            Utc::now() + TimeDelta::seconds(3600),
        ))
    }

    async fn get_audiences(&self, _service_account: &ServiceAccount) -> anyhow::Result<Vec<String>> {
        Ok(vec![format!("{}.mock", self.name)])
    }

    fn get_identity(&self, service_account: &ServiceAccount) -> String {
        service_account
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get("mock.auth/identity"))
            .cloned()
            .unwrap_or_default()
    }

    async fn new_token_for_service_account(
        &self,
        oidc_token: &str,
        _service_account: &ServiceAccount,
        _opts: &Options,
    ) -> anyhow::Result<AccessToken> {
        *self.exchange_calls.lock().expect("lock poisoned") += 1;
        if self.fail_exchange {
            anyhow::bail!("mock provider configured to fail token exchange");
        }
        Ok(AccessToken::new(
            self.name.clone(),
            format!("exchanged:{oidc_token}"),
            Utc::now() + TimeDelta::seconds(3600),
        ))
    }
}

impl CapabilityProvider for MockProvider {
    fn as_impersonation_capable(&self) -> Option<&dyn ImpersonationCapable> {
        self.supports_impersonation.then_some(self as &dyn ImpersonationCapable)
    }

    fn as_artifact_registry_capable(&self) -> Option<&dyn ArtifactRegistryCapable> {
        self.supports_artifact_registry.then_some(self as &dyn ArtifactRegistryCapable)
    }

    fn as_cluster_config_capable(&self) -> Option<&dyn ClusterConfigCapable> {
        self.supports_cluster.then_some(self as &dyn ClusterConfigCapable)
    }
}

#[async_trait]
impl ImpersonationCapable for MockProvider {
    fn get_impersonation_annotation_key(&self) -> &str {
        "mock.auth/impersonate"
    }

    fn get_identity_for_impersonation(
        &self,
        raw_json: &str,
    ) -> anyhow::Result<std::sync::Arc<dyn ImpersonationIdentity>> {
        let value: serde_json::Value = serde_json::from_str(raw_json)?;
        let target = value
            .get("target")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing `target` field"))?
            .to_string();
        let use_service_account = value
            .get("useServiceAccount")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true);
        Ok(std::sync::Arc::new(MockImpersonationIdentity {
            target,
            use_service_account,
        }))
    }

    async fn new_token_for_identity(
        &self,
        base_token: &AccessToken,
        identity: &dyn ImpersonationIdentity,
        _opts: &Options,
    ) -> anyhow::Result<AccessToken> {
        *self.impersonate_calls.lock().expect("lock poisoned") += 1;
        Ok(AccessToken::new(
            self.name.clone(),
            format!("impersonated:{}:{}", identity.cache_key_string(), base_token.token),
            Utc::now() + TimeDelta::seconds(3600),
        ))
    }
}

#[async_trait]
impl ArtifactRegistryCapable for MockProvider {
    fn get_access_token_options_for_artifact_repository(
        &self,
        _repository: &str,
    ) -> anyhow::Result<Vec<OptionFn>> {
        Ok(Vec::new())
    }

    fn parse_artifact_repository(&self, repository: &str) -> anyhow::Result<String> {
        if !repository.contains('/') {
            anyhow::bail!("repository {repository:?} is missing a registry host component");
        }
        Ok(repository.to_ascii_lowercase())
    }

    async fn new_artifact_registry_credentials(
        &self,
        _registry_input: &str,
        access_token: &AccessToken,
        _opts: &Options,
    ) -> anyhow::Result<ArtifactRegistryCredentials> {
        *self.registry_credential_calls.lock().expect("lock poisoned") += 1;
        Ok(ArtifactRegistryCredentials {
            provider: self.name.clone(),
            username: "registry-user".to_string(),
            password: format!("pw-for-{}", access_token.token),
            expires_at: Utc::now() + TimeDelta::seconds(3600),
        })
    }
}

#[async_trait]
impl ClusterConfigCapable for MockProvider {
    fn get_access_token_options_for_cluster(&self, _opts: &Options) -> anyhow::Result<Vec<Vec<OptionFn>>> {
        *self.cluster_token_option_calls.lock().expect("lock poisoned") += 1;
        Ok((0..self.cluster_token_count).map(|_| Vec::new()).collect())
    }

    async fn new_rest_config(
        &self,
        access_tokens: &[AccessToken],
        opts: &Options,
    ) -> anyhow::Result<RestConfig> {
        *self.rest_config_calls.lock().expect("lock poisoned") += 1;
        let host = match &opts.cluster_address {
            Some(address) => parse_cluster_address(address).map_err(|e| anyhow::anyhow!(e))?,
            None => String::new(),
        };
        Ok(RestConfig {
            provider: self.name.clone(),
            host,
            bearer_token: access_tokens
                .first()
                .map(|t| t.token.clone())
                .unwrap_or_default(),
            ca_data: None,
            expires_at: Utc::now() + TimeDelta::seconds(3600),
        })
    }
}

/// A [`KubernetesCollaborator`] backed by an in-memory map of service
/// accounts, returning a deterministic fake JWT from `issue_token_request`.
#[derive(Debug, Default)]
pub struct MockKubernetesCollaborator {
    service_accounts: Mutex<HashMap<(String, String), ServiceAccount>>,
}

impl MockKubernetesCollaborator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, namespace: impl Into<String>, name: impl Into<String>, sa: ServiceAccount) {
        self.service_accounts
            .lock()
            .expect("lock poisoned")
            .insert((namespace.into(), name.into()), sa);
    }
}

#[async_trait]
impl KubernetesCollaborator for MockKubernetesCollaborator {
    async fn get_service_account(&self, namespace: &str, name: &str) -> anyhow::Result<ServiceAccount> {
        self.service_accounts
            .lock()
            .expect("lock poisoned")
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such service account {namespace}/{name}"))
    }

    async fn issue_token_request(
        &self,
        namespace: &str,
        name: &str,
        audiences: &[String],
    ) -> anyhow::Result<String> {
        Ok(format!("jwt-for-{namespace}-{name}-{}", audiences.join(",")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sa(namespace: &str, name: &str) -> ServiceAccount {
        ServiceAccount {
            metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                namespace: Some(namespace.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn mock_provider_mints_controller_token() {
        let provider = MockProvider::new("mock");
        let token = provider.new_controller_token(&Options::new()).await.unwrap();
        assert_eq!(token.provider, "mock");
        assert_eq!(*provider.controller_token_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn mock_provider_can_be_configured_to_fail_exchange() {
        let provider = MockProvider::failing("mock");
        let result = provider
            .new_token_for_service_account("jwt", &sa("ns", "name"), &Options::new())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn mock_collaborator_round_trips_inserted_service_account() {
        let collaborator = MockKubernetesCollaborator::new();
        collaborator.insert("ns", "name", sa("ns", "name"));
        let fetched = collaborator.get_service_account("ns", "name").await.unwrap();
        assert_eq!(fetched.metadata.name.as_deref(), Some("name"));
    }
}
