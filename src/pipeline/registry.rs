//! # Registry-Credentials Pipeline
//!
//! §4.6: obtains an access token (single-flighted and cached on its own,
//! §4.5) then exchanges it for artifact-registry pull credentials behind a
//! second, independent cache lookup. The access-token cache lookup
//! happens strictly before the registry-credentials lookup and against a
//! different cache instance, so a slow registry-credentials producer for
//! one repository never blocks an unrelated access-token fetch behind the
//! same exclusive lock (and vice versa) — see the design notes on
//! lock-order avoidance.

use tracing::instrument;

use crate::cache::TokenCache;
use crate::cachekey;
use crate::cancellation::{self, CancellationToken};
use crate::error::{Error, Result};
use crate::options::Options;
use crate::pipeline::access_token::get_access_token_with_key;
use crate::policy::DefaultServiceAccountFlow;
use crate::provider::CapabilityProvider;
use crate::token::ArtifactRegistryCredentials;

/// Entry point: `GetArtifactRegistryCredentials(ctx, provider, repo, opts...)`.
/// Never cancelled; see [`get_artifact_registry_credentials_cancellable`].
///
/// `cache`, when supplied, is a registry-credentials cache distinct from
/// whatever access-token cache is configured on `opts` — the two are keyed
/// by different fingerprint spaces and must not share a lock.
#[instrument(skip(provider, cache, opts), fields(provider = provider.get_name(), repository = repository))]
pub async fn get_artifact_registry_credentials(
    provider: &dyn CapabilityProvider,
    repository: &str,
    cache: Option<&TokenCache<ArtifactRegistryCredentials>>,
    opts: Options,
) -> Result<ArtifactRegistryCredentials> {
    get_artifact_registry_credentials_cancellable(provider, &CancellationToken::new(), repository, cache, opts).await
}

/// Same as [`get_artifact_registry_credentials`], but the access-token
/// acquisition races against `ctx`.
pub async fn get_artifact_registry_credentials_cancellable(
    provider: &dyn CapabilityProvider,
    ctx: &CancellationToken,
    repository: &str,
    cache: Option<&TokenCache<ArtifactRegistryCredentials>>,
    opts: Options,
) -> Result<ArtifactRegistryCredentials> {
    let registry_provider = provider.as_artifact_registry_capable().ok_or_else(|| {
        Error::InvalidRepository {
            repository: repository.to_string(),
            source: anyhow::anyhow!(
                "provider {} does not support artifact registry credentials",
                provider.get_name()
            ),
        }
    })?;

    // Step 1: parse the repository and extract the provider's extra
    // access-token options (e.g. a region derived from the repository host).
    let registry_input = registry_provider
        .parse_artifact_repository(repository)
        .map_err(|source| Error::InvalidRepository {
            repository: repository.to_string(),
            source,
        })?;
    let extra_opts = registry_provider
        .get_access_token_options_for_artifact_repository(repository)
        .map_err(|source| Error::InvalidRepository {
            repository: repository.to_string(),
            source,
        })?;

    // Step 2: acquire the access token (its own cache lookup, outside this
    // one) using the merged options.
    let merged_opts = opts.apply(extra_opts);
    let (access_token, access_token_key) =
        get_access_token_with_key(provider, ctx, DefaultServiceAccountFlow::General, merged_opts).await?;

    // Step 3: compute the registry-level key and exchange.
    let key = cachekey::registry_credentials_key(&access_token_key, &registry_input);

    let Some(cache) = cache else {
        return cancellation::race(
            ctx,
            registry_provider.new_artifact_registry_credentials(&registry_input, &access_token, &Options::new()),
        )
        .await?
        .map_err(|source| Error::ProviderExchange {
            provider: provider.get_name().to_string(),
            source,
        });
    };

    cancellation::race(
        ctx,
        cache.get_or_set(key, || async {
            registry_provider
                .new_artifact_registry_credentials(&registry_input, &access_token, &Options::new())
                .await
                .map_err(|source| Error::ProviderExchange {
                    provider: provider.get_name().to_string(),
                    source,
                })
        }),
    )
    .await?
}
