//! # CacheKey Builder
//!
//! Produces the stable fingerprint that — together with the provider's
//! name and the resolved service account info — fully determines which
//! token a request should receive. The fingerprint is the SHA-256
//! (hex-encoded) of a string formed by joining labelled parts with commas,
//! in a fixed order, skipping absent ones.

use sha2::{Digest, Sha256};

use crate::options::Options;
use crate::serviceaccount::ServiceAccountInfo;

/// Build the access-token fingerprint (§4.1) from a provider name, the
/// resolved service account (if any), and the request options.
#[must_use]
pub fn access_token_key(
    provider: &str,
    service_account: Option<&ServiceAccountInfo>,
    opts: &Options,
) -> String {
    let mut parts = vec![format!("provider={provider}")];

    if let Some(sa) = service_account {
        if sa.use_service_account {
            parts.push(format!("serviceAccountName={}", sa.name));
            parts.push(format!("serviceAccountNamespace={}", sa.namespace));
            parts.push(format!(
                "serviceAccountTokenAudiences={}",
                sa.audiences.join(",")
            ));
            parts.push(format!("providerIdentity={}", sa.identity));
        }
        if let Some(impersonation) = &sa.impersonation {
            parts.push(format!(
                "providerIdentityForImpersonation={}",
                impersonation.cache_key_string()
            ));
        }
    }

    if !opts.scopes.is_empty() {
        parts.push(format!("scopes={}", opts.scopes.join(",")));
    }
    if let Some(region) = &opts.sts_region {
        parts.push(format!("stsRegion={region}"));
    }
    if let Some(endpoint) = &opts.sts_endpoint {
        parts.push(format!("stsEndpoint={endpoint}"));
    }
    if let Some(proxy) = &opts.proxy_url {
        parts.push(format!("proxyURL={proxy}"));
    }
    if let Some(ca) = &opts.ca_data {
        parts.push(format!("caData={}", String::from_utf8_lossy(ca)));
    }

    digest_hex(&parts.join(","))
}

/// Compose the registry-credentials cache key from the already-computed
/// access-token key and the provider-parsed registry input (§4.6).
#[must_use]
pub fn registry_credentials_key(access_token_key: &str, artifact_repository_input: &str) -> String {
    digest_hex(&format!(
        "accessToken0CacheKey={access_token_key}, artifactRepositoryCacheKey={artifact_repository_input}"
    ))
}

/// Compose the REST-config cache key from the ordered list of access-token
/// keys plus the canonicalised cluster resource/address (§4.7).
#[must_use]
pub fn rest_config_key(access_token_keys: &[String], cluster_resource: &str, address: &str) -> String {
    let mut parts: Vec<String> = access_token_keys
        .iter()
        .enumerate()
        .map(|(i, key)| format!("accessToken{i}CacheKey={key}"))
        .collect();
    parts.push(format!("cluster={cluster_resource}"));
    parts.push(format!("address={address}"));
    digest_hex(&parts.join(", "))
}

fn digest_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}
