//! # Multi-cloud workload-identity token broker
//!
//! A provider-agnostic library for exchanging Kubernetes-issued identity
//! tokens (or a controller's own ambient identity) for short-lived cloud
//! credentials: plain access tokens, artifact-registry pull credentials,
//! and managed-cluster REST configs. Credentials are cached with
//! conservative, dual-clock expiration and single-flighted so each
//! distinct request mints at most one credential per validity window.
//!
//! Concrete cloud wire protocols (AWS STS, GCP STS/IAM Credentials, Azure
//! AAD, GitHub App JWT exchange), the Kubernetes API client itself, and
//! controller-manager bootstrapping are out of scope: a caller supplies a
//! [`provider::Provider`] implementation and a [`serviceaccount::KubernetesCollaborator`]
//! and drives one of the three pipeline entry points:
//!
//! - [`pipeline::access_token::get_access_token`]
//! - [`pipeline::registry::get_artifact_registry_credentials`]
//! - [`pipeline::rest_config::get_rest_config`]
//!
//! Each has a `_cancellable` twin taking a [`CancellationToken`] for
//! callers that need to abandon an in-flight mint early.
//!
//! ## Example
//!
//! ```no_run
//! # async fn run(provider: &dyn workload_identity_broker::provider::CapabilityProvider) -> anyhow::Result<()> {
//! use workload_identity_broker::options::Options;
//! use workload_identity_broker::pipeline::get_access_token;
//!
//! let token = get_access_token(provider, Options::new()).await?;
//! println!("minted token for provider {}", token.provider);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod cachekey;
pub mod cancellation;
pub mod clusteraddress;
pub mod error;
pub mod labels;
pub mod observability;
pub mod options;
pub mod persistence;
pub mod pipeline;
pub mod policy;
pub mod provider;
pub mod serviceaccount;
#[cfg(any(test, feature = "test-util"))]
pub mod testutil;
pub mod token;

pub use cache::{LruCache, TokenCache};
pub use cancellation::CancellationToken;
pub use error::{Error, ErrorKind, Result};
pub use options::Options;
pub use token::{AccessToken, ArtifactRegistryCredentials, RestConfig, Token};
