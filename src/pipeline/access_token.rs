//! # Access-Token Pipeline
//!
//! §4.5: resolves ambient policy, optionally resolves the request's
//! `ServiceAccountInfo`, chooses and wraps an initial-token producer, and
//! either invokes it directly or folds it through the cache's single-flight
//! `GetOrSet`.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::cachekey;
use crate::cancellation::{self, CancellationToken};
use crate::error::{Error, Result};
use crate::options::Options;
use crate::policy::{self, DefaultServiceAccountFlow};
use crate::provider::{CapabilityProvider, Provider};
use crate::serviceaccount::{ImpersonationIdentity, KubernetesCollaborator, ServiceAccountInfo};
use crate::token::AccessToken;

/// Entry point: `GetAccessToken(ctx, provider, opts...)`. Never cancelled:
/// callers that need cancellation should use
/// [`get_access_token_cancellable`] directly.
#[instrument(skip(provider, opts), fields(provider = provider.get_name()))]
pub async fn get_access_token(provider: &dyn CapabilityProvider, opts: Options) -> Result<AccessToken> {
    get_access_token_cancellable(provider, &CancellationToken::new(), opts).await
}

/// Same as [`get_access_token`], but every suspension point races against
/// `ctx`: a cancelled caller unblocks immediately instead of waiting out
/// the underlying Kubernetes or provider call.
pub async fn get_access_token_cancellable(
    provider: &dyn CapabilityProvider,
    ctx: &CancellationToken,
    opts: Options,
) -> Result<AccessToken> {
    get_access_token_for_flow(provider, ctx, DefaultServiceAccountFlow::General, opts).await
}

/// Internal variant used by the derived pipelines, which resolve their own
/// default-service-account flow before delegating here.
pub(crate) async fn get_access_token_for_flow(
    provider: &dyn CapabilityProvider,
    ctx: &CancellationToken,
    flow: DefaultServiceAccountFlow,
    opts: Options,
) -> Result<AccessToken> {
    get_access_token_with_key(provider, ctx, flow, opts).await.map(|(token, _)| token)
}

/// Same as [`get_access_token_for_flow`], but also returns the access-token
/// cache-key fingerprint that was used (or would have been used, had a
/// cache been configured) — the derived pipelines (§4.6, §4.7) need this
/// exact fingerprint to compose their own higher-level cache keys without
/// re-resolving the `ServiceAccountInfo` a second time.
pub(crate) async fn get_access_token_with_key(
    provider: &dyn CapabilityProvider,
    ctx: &CancellationToken,
    flow: DefaultServiceAccountFlow,
    mut opts: Options,
) -> Result<(AccessToken, String)> {
    // Step 1: resolve ambient policy.
    if opts.service_account_name.is_none() {
        if let Some(namespace) = opts.service_account_namespace.clone() {
            if let Some(default_name) = policy::default_service_account(flow) {
                debug!(%namespace, %default_name, "substituting default service account");
                opts.service_account_name = Some(default_name);
            }
        }
    }

    let Some(sa_name) = opts.service_account_name.clone() else {
        // No service account in play at all: mint straight from the
        // controller's own ambient identity, no feature gate or cache-key
        // service-account fields involved.
        let key = cachekey::access_token_key(provider.get_name(), None, &opts);
        let producer = build_controller_producer(provider, ctx, opts.clone());
        let token = run_producer(ctx, key.clone(), opts, producer).await?;
        return Ok((token, key));
    };

    // Step 2: feature gate check.
    if !policy::object_level_workload_identity_enabled() {
        return Err(Error::ObjectLevelWorkloadIdentityDisabled);
    }

    let sa_namespace = opts
        .service_account_namespace
        .clone()
        .unwrap_or_default();

    // Step 3: resolve ServiceAccountInfo.
    let sa_info = resolve_service_account_info(provider, ctx, &opts, &sa_namespace, &sa_name).await?;

    if !sa_info.use_service_account && policy::multi_tenant_lockdown_enabled() {
        return Err(Error::LockdownViolation {
            namespace: sa_namespace,
            name: sa_name,
        });
    }

    let key = cachekey::access_token_key(provider.get_name(), Some(&sa_info), &opts);

    // Step 4 + 5: choose the initial producer, wrap with impersonation.
    let producer = build_service_account_producer(provider, ctx, opts.clone(), sa_info.clone());

    // Step 6: cache or invoke directly.
    let token = run_producer(ctx, key.clone(), opts, producer).await?;
    Ok((token, key))
}

async fn resolve_service_account_info(
    provider: &dyn CapabilityProvider,
    ctx: &CancellationToken,
    opts: &Options,
    namespace: &str,
    name: &str,
) -> Result<ServiceAccountInfo> {
    let client = opts
        .client
        .clone()
        .ok_or_else(|| Error::ServiceAccountLookup {
            namespace: namespace.to_string(),
            name: name.to_string(),
            source: anyhow::anyhow!("no Kubernetes collaborator configured in Options"),
        })?;

    let service_account = cancellation::race(ctx, client.get_service_account(namespace, name))
        .await?
        .map_err(|source| Error::ServiceAccountLookup {
            namespace: namespace.to_string(),
            name: name.to_string(),
            source,
        })?;

    let audiences = cancellation::race(ctx, provider.get_audiences(&service_account))
        .await?
        .map_err(|source| Error::ProviderAudiences {
            provider: provider.get_name().to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            source,
        })?;

    let identity = provider.get_identity(&service_account);

    let mut use_service_account = true;
    let mut impersonation: Option<Arc<dyn ImpersonationIdentity>> = None;

    if let Some(impersonation_capable) = provider.as_impersonation_capable() {
        let annotation_key = impersonation_capable.get_impersonation_annotation_key();
        if let Some(raw_json) = service_account
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(annotation_key))
        {
            let parsed = impersonation_capable
                .get_identity_for_impersonation(raw_json)
                .map_err(|source| Error::ProviderIdentity {
                    provider: provider.get_name().to_string(),
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    source,
                })?;
            use_service_account = parsed.use_service_account();
            impersonation = Some(parsed);
        }
    }

    Ok(ServiceAccountInfo {
        service_account,
        namespace: namespace.to_string(),
        name: name.to_string(),
        audiences,
        identity,
        impersonation,
        use_service_account,
    })
}

fn build_controller_producer<'p>(
    provider: &'p dyn CapabilityProvider,
    ctx: &'p CancellationToken,
    opts: Options,
) -> impl FnOnce() -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<AccessToken>> + Send + 'p>> + 'p
{
    move || {
        Box::pin(async move {
            cancellation::race(ctx, provider.new_controller_token(&opts))
                .await?
                .map_err(|source| Error::ProviderController {
                    provider: provider.get_name().to_string(),
                    source,
                })
        })
    }
}

fn build_service_account_producer<'p>(
    provider: &'p dyn CapabilityProvider,
    ctx: &'p CancellationToken,
    opts: Options,
    sa_info: ServiceAccountInfo,
) -> impl FnOnce() -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<AccessToken>> + Send + 'p>> + 'p
{
    move || {
        Box::pin(async move {
            let base = if sa_info.use_service_account {
                let client = opts.client.clone().ok_or_else(|| Error::ServiceAccountLookup {
                    namespace: sa_info.namespace.clone(),
                    name: sa_info.name.clone(),
                    source: anyhow::anyhow!("no Kubernetes collaborator configured in Options"),
                })?;
                let jwt = cancellation::race(
                    ctx,
                    client.issue_token_request(&sa_info.namespace, &sa_info.name, &sa_info.audiences),
                )
                .await?
                .map_err(|source| Error::ServiceAccountLookup {
                    namespace: sa_info.namespace.clone(),
                    name: sa_info.name.clone(),
                    source,
                })?;
                cancellation::race(
                    ctx,
                    provider.new_token_for_service_account(&jwt, &sa_info.service_account, &opts),
                )
                .await?
                .map_err(|source| Error::ProviderExchange {
                    provider: provider.get_name().to_string(),
                    source,
                })?
            } else {
                cancellation::race(ctx, provider.new_controller_token(&opts))
                    .await?
                    .map_err(|source| Error::ProviderController {
                        provider: provider.get_name().to_string(),
                        source,
                    })?
            };

            let Some(identity) = sa_info.impersonation.as_deref() else {
                return Ok(base);
            };
            let impersonation_capable = provider.as_impersonation_capable().ok_or_else(|| {
                Error::ProviderImpersonate {
                    provider: provider.get_name().to_string(),
                    source: anyhow::anyhow!(
                        "service account carried an impersonation identity but provider {} does not support impersonation",
                        provider.get_name()
                    ),
                }
            })?;
            cancellation::race(ctx, impersonation_capable.new_token_for_identity(&base, identity, &opts))
                .await?
                .map_err(|source| Error::ProviderImpersonate {
                    provider: provider.get_name().to_string(),
                    source,
                })
        })
    }
}

async fn run_producer<'p>(
    ctx: &CancellationToken,
    key: String,
    opts: Options,
    producer: impl FnOnce() -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<AccessToken>> + Send + 'p>>,
) -> Result<AccessToken> {
    let Some(cache) = opts.cache.clone() else {
        return cancellation::race(ctx, producer()).await?;
    };

    cache.set_involved_object(opts.involved_object.clone()).await;
    cancellation::race(ctx, cache.get_or_set(key, producer)).await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{with_cache, with_client, with_service_account};
    use crate::testutil::{MockKubernetesCollaborator, MockProvider};
    use k8s_openapi::api::core::v1::ServiceAccount;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
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

    fn sa_with_annotation(namespace: &str, name: &str, key: &str, value: &str) -> ServiceAccount {
        let mut sa = sa(namespace, name);
        sa.metadata.annotations = Some([(key.to_string(), value.to_string())].into_iter().collect());
        sa
    }

    #[tokio::test]
    async fn impersonation_wraps_the_base_token() {
        policy::reset_for_test();
        policy::set_object_level_workload_identity_enabled(true);
        let provider = MockProvider::with_impersonation("mock");
        let collaborator = MockKubernetesCollaborator::new();
        collaborator.insert(
            "ns",
            "sa",
            sa_with_annotation(
                "ns",
                "sa",
                "mock.auth/impersonate",
                r#"{"target":"arn:aws:iam::123:role/target","useServiceAccount":true}"#,
            ),
        );
        let opts = Options::new().apply(vec![
            with_service_account("sa", "ns"),
            with_client(Arc::new(collaborator)),
        ]);
        let token = get_access_token(&provider, opts).await.unwrap();
        assert!(token.token.starts_with("impersonated:arn:aws:iam::123:role/target:"));
        assert_eq!(*provider.impersonate_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn impersonation_hint_to_skip_service_account_uses_controller_identity() {
        policy::reset_for_test();
        policy::set_object_level_workload_identity_enabled(true);
        let provider = MockProvider::with_impersonation("mock");
        let collaborator = MockKubernetesCollaborator::new();
        collaborator.insert(
            "ns",
            "sa",
            sa_with_annotation(
                "ns",
                "sa",
                "mock.auth/impersonate",
                r#"{"target":"sa@project.iam.gserviceaccount.com","useServiceAccount":false}"#,
            ),
        );
        let opts = Options::new().apply(vec![
            with_service_account("sa", "ns"),
            with_client(Arc::new(collaborator)),
        ]);
        let token = get_access_token(&provider, opts).await.unwrap();
        assert!(token.token.starts_with("impersonated:sa@project.iam.gserviceaccount.com:controller-token"));
        assert_eq!(*provider.controller_token_calls.lock().unwrap(), 1);
        assert_eq!(*provider.exchange_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn lockdown_rejects_impersonation_hint_to_use_controller_identity() {
        policy::reset_for_test();
        policy::set_object_level_workload_identity_enabled(true);
        policy::set_multi_tenant_lockdown_enabled(true);
        let provider = MockProvider::with_impersonation("mock");
        let collaborator = MockKubernetesCollaborator::new();
        collaborator.insert(
            "ns",
            "sa",
            sa_with_annotation(
                "ns",
                "sa",
                "mock.auth/impersonate",
                r#"{"target":"sa@project.iam.gserviceaccount.com","useServiceAccount":false}"#,
            ),
        );
        let opts = Options::new().apply(vec![
            with_service_account("sa", "ns"),
            with_client(Arc::new(collaborator)),
        ]);
        let err = get_access_token(&provider, opts).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::LockdownViolation);
    }

    #[tokio::test]
    async fn controller_flow_when_no_service_account_given() {
        policy::reset_for_test();
        let provider = MockProvider::new("mock");
        let token = get_access_token(&provider, Options::new()).await.unwrap();
        assert_eq!(token.token, "controller-token");
        assert_eq!(*provider.controller_token_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn service_account_flow_fails_when_feature_gate_disabled() {
        policy::reset_for_test();
        policy::set_object_level_workload_identity_enabled(false);
        let provider = MockProvider::new("mock");
        let opts = Options::new().apply(vec![with_service_account("sa", "ns")]);
        let err = get_access_token(&provider, opts).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ObjectLevelWorkloadIdentityDisabled);
    }

    #[tokio::test]
    async fn service_account_flow_exchanges_token_request_jwt() {
        policy::reset_for_test();
        policy::set_object_level_workload_identity_enabled(true);
        let provider = MockProvider::new("mock");
        let collaborator = MockKubernetesCollaborator::new();
        collaborator.insert("ns", "sa", sa("ns", "sa"));
        let opts = Options::new().apply(vec![
            with_service_account("sa", "ns"),
            with_client(Arc::new(collaborator)),
        ]);
        let token = get_access_token(&provider, opts).await.unwrap();
        assert!(token.token.starts_with("exchanged:jwt-for-ns-sa"));
        assert_eq!(*provider.exchange_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn an_already_cancelled_context_short_circuits_before_minting() {
        policy::reset_for_test();
        let provider = MockProvider::new("mock");
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = get_access_token_cancellable(&provider, &ctx, Options::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Cancelled);
        assert_eq!(*provider.controller_token_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn single_flights_concurrent_identical_requests_through_the_cache() {
        policy::reset_for_test();
        policy::set_object_level_workload_identity_enabled(true);
        let provider = MockProvider::new("mock");
        let collaborator = MockKubernetesCollaborator::new();
        collaborator.insert("ns", "sa", sa("ns", "sa"));
        let cache = Arc::new(crate::cache::TokenCache::new(8, Duration::from_secs(3600)));
        let opts = Options::new().apply(vec![
            with_service_account("sa", "ns"),
            with_client(Arc::new(collaborator)),
            with_cache(cache),
        ]);
        let first = get_access_token(&provider, opts.clone()).await.unwrap();
        let second = get_access_token(&provider, opts).await.unwrap();
        assert_eq!(first.token, second.token);
        assert_eq!(*provider.exchange_calls.lock().unwrap(), 1);
    }
}
