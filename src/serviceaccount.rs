//! # ServiceAccount resolution
//!
//! Per the data model, [`ServiceAccountInfo`] is resolved from the
//! Kubernetes API once per request and never cached across calls (the
//! service account's annotations may change between calls). The actual
//! Kubernetes API access — fetching the `ServiceAccount` object and
//! issuing a `TokenRequest` — is kept behind the narrow
//! [`KubernetesCollaborator`] trait the Non-goals call out as an injected
//! collaborator; this crate never talks to `kube::Client` directly outside
//! of the default adapter below.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ServiceAccount;

use crate::error::{Error, Result};

/// A provider-specific identity extracted from an impersonation annotation.
///
/// The core pipeline treats this as opaque: it only needs a stable string
/// representation for cache-key fingerprinting (`Stringer`-like, per the
/// design notes) and a hint for whether the initial token should still come
/// from the service account's own OIDC exchange.
pub trait ImpersonationIdentity: fmt::Debug + Send + Sync {
    /// Stable string representation used verbatim in the cache key.
    fn cache_key_string(&self) -> String;

    /// `false` for providers (e.g. GCP workload identity federation) where
    /// the initial token must come from the controller's ambient identity
    /// rather than a per-object service account OIDC exchange.
    fn use_service_account(&self) -> bool {
        true
    }
}

/// Everything the pipeline learns about a request's service account in one
/// resolution pass.
#[derive(Clone)]
pub struct ServiceAccountInfo {
    pub service_account: ServiceAccount,
    pub namespace: String,
    pub name: String,
    /// Audiences the provider will accept, as returned by
    /// `Provider::get_audiences`. Order is preserved verbatim into the
    /// cache key.
    pub audiences: Vec<String>,
    /// Provider-specific identity handle (e.g. role ARN, service account
    /// email) from `Provider::get_identity`. Empty string means "no
    /// impersonation needed".
    pub identity: String,
    /// Parsed impersonation target, if the service account carried the
    /// provider's impersonation annotation.
    pub impersonation: Option<Arc<dyn ImpersonationIdentity>>,
    /// Whether the initial token should be minted via this service
    /// account's OIDC exchange (`true`) or from the controller's ambient
    /// identity (`false`, e.g. GCP federation).
    pub use_service_account: bool,
}

impl fmt::Debug for ServiceAccountInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountInfo")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("audiences", &self.audiences)
            .field("identity", &self.identity)
            .field("impersonation", &self.impersonation.is_some())
            .field("use_service_account", &self.use_service_account)
            .finish()
    }
}

/// The narrow slice of the Kubernetes API the pipeline depends on. A real
/// adapter wraps `kube::Api<ServiceAccount>` and the `TokenRequest`
/// subresource; tests substitute [`crate::testutil::MockKubernetesCollaborator`].
#[async_trait]
pub trait KubernetesCollaborator: Send + Sync {
    /// Fetch the named `ServiceAccount`.
    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<ServiceAccount>;

    /// Issue a Kubernetes `TokenRequest` against the named service account
    /// for the given audiences, returning the signed JWT.
    async fn issue_token_request(
        &self,
        namespace: &str,
        name: &str,
        audiences: &[String],
    ) -> anyhow::Result<String>;
}

/// A Kubernetes-API-backed [`KubernetesCollaborator`], a thin wrapper over
/// a single-purpose `kube::Api`.
pub struct KubeClientCollaborator {
    client: kube::Client,
}

impl KubeClientCollaborator {
    #[must_use]
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KubernetesCollaborator for KubeClientCollaborator {
    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<ServiceAccount> {
        use kube::api::Api;
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn issue_token_request(
        &self,
        namespace: &str,
        name: &str,
        audiences: &[String],
    ) -> anyhow::Result<String> {
        use k8s_openapi::api::authentication::v1::{TokenRequest, TokenRequestSpec};
        use kube::api::{Api, PostParams};

        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let request = TokenRequest {
            spec: TokenRequestSpec {
                audiences: audiences.to_vec(),
                ..Default::default()
            },
            ..Default::default()
        };
        let response = api
            .create_subresource("token", name, &PostParams::default(), serde_json::to_vec(&request)?)
            .await?;
        response
            .status
            .map(|s| s.token)
            .ok_or_else(|| anyhow::anyhow!("TokenRequest for {namespace}/{name} returned no status"))
    }
}

/// Resolve the `system:serviceaccount:<ns>:<name>` identity embedded in an
/// already-read, unverified JWT's `sub` claim.
///
/// Used when a controller needs to self-identify from its own pod-mounted
/// service-account token without making a live Kubernetes API call — the
/// file itself is read by the caller, consistent with the Kubernetes API
/// client being an injected collaborator rather than something this crate
/// opens on its own.
pub fn ambient_identity_from_jwt(raw_token: &str) -> Result<(String, String)> {
    let sub = decode_unverified_sub(raw_token).ok_or_else(|| Error::InvalidIdentityAnnotation {
        namespace: String::new(),
        name: String::new(),
        source: anyhow::anyhow!("token has no decodable `sub` claim"),
    })?;

    let rest = sub
        .strip_prefix("system:serviceaccount:")
        .ok_or_else(|| Error::InvalidIdentityAnnotation {
            namespace: String::new(),
            name: String::new(),
            source: anyhow::anyhow!("sub claim {sub:?} is not a service-account subject"),
        })?;

    let (namespace, name) = rest.split_once(':').ok_or_else(|| Error::InvalidIdentityAnnotation {
        namespace: String::new(),
        name: String::new(),
        source: anyhow::anyhow!("sub claim {sub:?} is missing the namespace:name separator"),
    })?;

    Ok((namespace.to_string(), name.to_string()))
}

fn decode_unverified_sub(raw_token: &str) -> Option<String> {
    let mut parts = raw_token.split('.');
    let _header = parts.next()?;
    let payload = parts.next()?;
    let decoded = base64_url_decode(payload)?;
    let value: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    value.get("sub")?.as_str().map(ToString::to_string)
}

/// Minimal base64url (no padding) decoder, avoiding a dependency purely for
/// decoding a single well-known field out of an unverified JWT.
fn base64_url_decode(input: &str) -> Option<Vec<u8>> {
    const TABLE: &[u8; 64] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
    let mut reverse = [255u8; 256];
    for (i, &c) in TABLE.iter().enumerate() {
        reverse[c as usize] = u8::try_from(i).ok()?;
    }

    let mut buffer = 0u32;
    let mut bits = 0u32;
    let mut out = Vec::with_capacity(input.len() * 3 / 4 + 3);
    for byte in input.bytes() {
        let value = reverse[byte as usize];
        if value == 255 {
            return None;
        }
        buffer = (buffer << 6) | u32::from(value);
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push(((buffer >> bits) & 0xFF) as u8);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_token(sub: &str) -> String {
        let header = base64_url_encode(b"{\"alg\":\"none\"}");
        let payload = base64_url_encode(format!("{{\"sub\":\"{sub}\"}}").as_bytes());
        format!("{header}.{payload}.")
    }

    fn base64_url_encode(input: &[u8]) -> String {
        const TABLE: &[u8; 64] =
            b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
        let mut out = String::new();
        for chunk in input.chunks(3) {
            let b0 = chunk[0];
            let b1 = *chunk.get(1).unwrap_or(&0);
            let b2 = *chunk.get(2).unwrap_or(&0);
            let n = (u32::from(b0) << 16) | (u32::from(b1) << 8) | u32::from(b2);
            out.push(TABLE[((n >> 18) & 0x3F) as usize] as char);
            out.push(TABLE[((n >> 12) & 0x3F) as usize] as char);
            if chunk.len() > 1 {
                out.push(TABLE[((n >> 6) & 0x3F) as usize] as char);
            }
            if chunk.len() > 2 {
                out.push(TABLE[(n & 0x3F) as usize] as char);
            }
        }
        out
    }

    #[test]
    fn parses_namespace_and_name_from_sub_claim() {
        let token = make_token("system:serviceaccount:flux-system:controller");
        let (ns, name) = ambient_identity_from_jwt(&token).unwrap();
        assert_eq!(ns, "flux-system");
        assert_eq!(name, "controller");
    }

    #[test]
    fn rejects_non_service_account_subjects() {
        let token = make_token("someone@example.com");
        assert!(ambient_identity_from_jwt(&token).is_err());
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(ambient_identity_from_jwt("not-a-jwt").is_err());
    }
}
