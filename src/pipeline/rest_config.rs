//! # REST-Config Pipeline
//!
//! §4.7: acquires one access token per inner option slice the provider
//! declares it needs (EKS needs one; GKE may need two), canonicalises the
//! cluster address, and exchanges the ordered token list for a REST config
//! behind its own cache lookup — independent of the access-token cache(s)
//! used to acquire the individual tokens, for the same lock-order reasons
//! as the registry-credentials pipeline.

use tracing::instrument;

use crate::cache::TokenCache;
use crate::cachekey;
use crate::cancellation::{self, CancellationToken};
use crate::clusteraddress::parse_cluster_address;
use crate::error::{Error, Result};
use crate::options::Options;
use crate::pipeline::access_token::get_access_token_with_key;
use crate::policy::DefaultServiceAccountFlow;
use crate::provider::CapabilityProvider;
use crate::token::RestConfig;

/// Entry point: `GetRESTConfig(ctx, provider, opts...)`. Never cancelled;
/// see [`get_rest_config_cancellable`].
#[instrument(skip(provider, cache, opts), fields(provider = provider.get_name()))]
pub async fn get_rest_config(
    provider: &dyn CapabilityProvider,
    cache: Option<&TokenCache<RestConfig>>,
    opts: Options,
) -> Result<RestConfig> {
    get_rest_config_cancellable(provider, &CancellationToken::new(), cache, opts).await
}

/// Same as [`get_rest_config`], but every per-token acquisition races
/// against `ctx`.
pub async fn get_rest_config_cancellable(
    provider: &dyn CapabilityProvider,
    ctx: &CancellationToken,
    cache: Option<&TokenCache<RestConfig>>,
    opts: Options,
) -> Result<RestConfig> {
    let cluster_provider = provider.as_cluster_config_capable().ok_or_else(|| {
        Error::InvalidAddress {
            address: opts.cluster_address.clone().unwrap_or_default(),
            reason: format!(
                "provider {} does not support cluster REST configuration",
                provider.get_name()
            ),
        }
    })?;

    let token_option_sets = cluster_provider
        .get_access_token_options_for_cluster(&opts)
        .map_err(|source| Error::ProviderExchange {
            provider: provider.get_name().to_string(),
            source,
        })?;

    // Step 1: acquire one access token per inner option slice, in order.
    let mut access_tokens = Vec::with_capacity(token_option_sets.len());
    let mut access_token_keys = Vec::with_capacity(token_option_sets.len());
    for inner_opts in token_option_sets {
        let merged = opts.clone().apply(inner_opts);
        let (token, key) =
            get_access_token_with_key(provider, ctx, DefaultServiceAccountFlow::KubeconfigOnly, merged).await?;
        access_tokens.push(token);
        access_token_keys.push(key);
    }

    // Step 2: canonicalise the cluster address, when present.
    let canonical_address = match &opts.cluster_address {
        Some(address) => parse_cluster_address(address)?,
        None => String::new(),
    };
    let cluster_resource = opts.cluster_resource.clone().unwrap_or_default();

    // Step 3: compose the cache key from every access-token key plus the
    // cluster identity.
    let key = cachekey::rest_config_key(&access_token_keys, &cluster_resource, &canonical_address);

    let Some(cache) = cache else {
        return cancellation::race(ctx, cluster_provider.new_rest_config(&access_tokens, &opts))
            .await?
            .map_err(|source| Error::ProviderExchange {
                provider: provider.get_name().to_string(),
                source,
            });
    };

    cancellation::race(
        ctx,
        cache.get_or_set(key, || async {
            cluster_provider
                .new_rest_config(&access_tokens, &opts)
                .await
                .map_err(|source| Error::ProviderExchange {
                    provider: provider.get_name().to_string(),
                    source,
                })
        }),
    )
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{with_cluster_address, with_cluster_resource, with_service_account};
    use crate::policy;
    use crate::testutil::{MockKubernetesCollaborator, MockProvider};
    use k8s_openapi::api::core::v1::ServiceAccount;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::sync::Arc;
    use std::time::Duration;

    fn sa(namespace: &str, name: &str) -> ServiceAccount {
        ServiceAccount {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn rejects_cluster_when_provider_lacks_cluster_capability() {
        policy::reset_for_test();
        let provider = MockProvider::new("mock");
        let err = get_rest_config(&provider, None, Options::new()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidAddress);
    }

    #[tokio::test]
    async fn assembles_rest_config_from_two_access_tokens() {
        policy::reset_for_test();
        let provider = MockProvider::with_cluster_config("mock", 2);
        let opts = Options::new().apply(vec![
            with_cluster_resource("cluster/resource/name"),
            with_cluster_address("cluster/resource/name"),
        ]);
        let config = get_rest_config(&provider, None, opts).await.unwrap();
        assert_eq!(config.host, "https://cluster/resource/name:443");
        assert_eq!(*provider.cluster_token_option_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn an_already_cancelled_context_short_circuits_before_assembling() {
        policy::reset_for_test();
        let provider = MockProvider::with_cluster_config("mock", 1);
        let ctx = CancellationToken::new();
        ctx.cancel();
        let opts = Options::new().apply(vec![
            with_cluster_resource("cluster/resource/name"),
            with_cluster_address("cluster/resource/name"),
        ]);
        let err = get_rest_config_cancellable(&provider, &ctx, None, opts)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Cancelled);
        assert_eq!(*provider.rest_config_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn caches_rest_config_across_calls() {
        policy::reset_for_test();
        policy::set_object_level_workload_identity_enabled(true);
        let provider = MockProvider::with_cluster_config("mock", 1);
        let collaborator = MockKubernetesCollaborator::new();
        collaborator.insert("ns", "sa", sa("ns", "sa"));
        let cache = TokenCache::new(8, Duration::from_secs(3600));
        let opts = Options::new().apply(vec![
            with_service_account("sa", "ns"),
            crate::options::with_client(Arc::new(collaborator)),
            with_cluster_resource("cluster/resource/name"),
            with_cluster_address("cluster/resource/name"),
        ]);

        let first = get_rest_config(&provider, Some(&cache), opts.clone()).await.unwrap();
        let second = get_rest_config(&provider, Some(&cache), opts).await.unwrap();
        assert_eq!(first.host, second.host);
        assert_eq!(*provider.rest_config_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn rejects_non_https_cluster_address() {
        policy::reset_for_test();
        let provider = MockProvider::with_cluster_config("mock", 1);
        let opts = Options::new().apply(vec![
            with_cluster_resource("cluster/resource/name"),
            with_cluster_address("http://cluster.example.com"),
        ]);
        let err = get_rest_config(&provider, None, opts).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidAddress);
    }
}
