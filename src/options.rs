//! # Request options
//!
//! [`Options`] is the immutable-once-built parameter bundle every pipeline
//! entry point takes. Per the data model, it is accumulated by applying a
//! sequence of modifier functions ([`OptionFn`]); applying modifiers is
//! associative and the final state is independent of modifier order except
//! for list-valued fields with documented order semantics (`scopes` is
//! order-preserving, `audiences` is order-insensitive for key derivation).

use std::sync::Arc;

use crate::cache::TokenCache;
pub use crate::labels::InvolvedObject;
use crate::serviceaccount::KubernetesCollaborator;
use crate::token::AccessToken;

/// The accumulated, provider-agnostic request parameters.
#[derive(Clone, Default)]
pub struct Options {
    pub client: Option<Arc<dyn KubernetesCollaborator>>,
    pub cache: Option<Arc<TokenCache<AccessToken>>>,
    pub service_account_name: Option<String>,
    pub service_account_namespace: Option<String>,
    pub involved_object: InvolvedObject,
    /// Reserved for provider-specific use; not used by the generic pipeline
    /// and not part of the cache key (the key uses the audiences the
    /// provider itself reports via `Provider::get_audiences`).
    pub audiences: Vec<String>,
    /// Order-preserving; part of the cache key verbatim.
    pub scopes: Vec<String>,
    pub sts_region: Option<String>,
    pub sts_endpoint: Option<String>,
    pub proxy_url: Option<String>,
    pub ca_data: Option<Vec<u8>>,
    pub cluster_resource: Option<String>,
    pub cluster_address: Option<String>,
    pub allow_shell_out: bool,
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("client", &self.client.is_some())
            .field("cache", &self.cache.is_some())
            .field("service_account_name", &self.service_account_name)
            .field("service_account_namespace", &self.service_account_namespace)
            .field("involved_object", &self.involved_object)
            .field("audiences", &self.audiences)
            .field("scopes", &self.scopes)
            .field("sts_region", &self.sts_region)
            .field("sts_endpoint", &self.sts_endpoint)
            .field("proxy_url", &self.proxy_url)
            .field("ca_data", &self.ca_data.as_ref().map(|d| d.len()))
            .field("cluster_resource", &self.cluster_resource)
            .field("cluster_address", &self.cluster_address)
            .field("allow_shell_out", &self.allow_shell_out)
            .finish()
    }
}

/// A single deferred mutation applied to an in-progress [`Options`] value.
///
/// Mirrors the functional-options idiom the pipeline's variadic `opts...`
/// parameters are modelled on: pipeline entry points take
/// `impl IntoIterator<Item = OptionFn>` and apply each in order.
pub type OptionFn = Box<dyn FnOnce(&mut Options) + Send + Sync>;

impl Options {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a sequence of modifiers in order, returning the accumulated
    /// result. Per the associativity invariant, the final value does not
    /// depend on the order of modifiers except where documented (scopes).
    #[must_use]
    pub fn apply(mut self, fns: impl IntoIterator<Item = OptionFn>) -> Self {
        for f in fns {
            f(&mut self);
        }
        self
    }
}

pub fn with_client(client: Arc<dyn KubernetesCollaborator>) -> OptionFn {
    Box::new(move |o| o.client = Some(client))
}

pub fn with_cache(cache: Arc<TokenCache<AccessToken>>) -> OptionFn {
    Box::new(move |o| o.cache = Some(cache))
}

pub fn with_service_account(name: impl Into<String>, namespace: impl Into<String>) -> OptionFn {
    let (name, namespace) = (name.into(), namespace.into());
    Box::new(move |o| {
        o.service_account_name = Some(name);
        o.service_account_namespace = Some(namespace);
    })
}

pub fn with_involved_object(involved: InvolvedObject) -> OptionFn {
    Box::new(move |o| o.involved_object = involved)
}

pub fn with_audiences(audiences: impl IntoIterator<Item = String>) -> OptionFn {
    let audiences: Vec<String> = audiences.into_iter().collect();
    Box::new(move |o| o.audiences = audiences)
}

pub fn with_scopes(scopes: impl IntoIterator<Item = String>) -> OptionFn {
    let scopes: Vec<String> = scopes.into_iter().collect();
    Box::new(move |o| o.scopes = scopes)
}

pub fn with_sts_region(region: impl Into<String>) -> OptionFn {
    let region = region.into();
    Box::new(move |o| o.sts_region = Some(region))
}

pub fn with_sts_endpoint(endpoint: impl Into<String>) -> OptionFn {
    let endpoint = endpoint.into();
    Box::new(move |o| o.sts_endpoint = Some(endpoint))
}

pub fn with_proxy_url(proxy_url: impl Into<String>) -> OptionFn {
    let proxy_url = proxy_url.into();
    Box::new(move |o| o.proxy_url = Some(proxy_url))
}

pub fn with_ca_data(ca_data: impl Into<Vec<u8>>) -> OptionFn {
    let ca_data = ca_data.into();
    Box::new(move |o| o.ca_data = Some(ca_data))
}

pub fn with_cluster_resource(resource: impl Into<String>) -> OptionFn {
    let resource = resource.into();
    Box::new(move |o| o.cluster_resource = Some(resource))
}

pub fn with_cluster_address(address: impl Into<String>) -> OptionFn {
    let address = address.into();
    Box::new(move |o| o.cluster_address = Some(address))
}

pub fn with_allow_shell_out(allow: bool) -> OptionFn {
    Box::new(move |o| o.allow_shell_out = allow)
}
