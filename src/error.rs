//! # Error taxonomy
//!
//! Stable, matchable error kinds for the credential pipeline, per the
//! error-handling design: callers branch on [`ErrorKind`], never on
//! message text. [`Error::to_string`] still produces an enriched message
//! (service account namespace/name, provider name, repo/cluster id, and
//! the underlying cause chain) for logs.

use thiserror::Error;

/// Stable, string-independent discriminant for an [`Error`].
///
/// Mirrors the error kinds named in the error-handling design: callers can
/// match on this instead of parsing `Display` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ObjectLevelWorkloadIdentityDisabled,
    LockdownViolation,
    ServiceAccountLookup,
    ProviderIdentity,
    ProviderAudiences,
    ProviderExchange,
    ProviderImpersonate,
    ProviderController,
    InvalidRepository,
    InvalidAddress,
    InvalidIdentityAnnotation,
    CacheFull,
    CacheClosed,
    InvalidSize,
    NotFound,
    InvalidKey,
    Cancelled,
}

/// The crate's single error type. Every pipeline operation returns
/// `Result<T, Error>`; no error is swallowed anywhere in the pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error("ObjectLevelWorkloadIdentity feature gate is not enabled for this flow")]
    ObjectLevelWorkloadIdentityDisabled,

    #[error(
        "refusing to fall back to controller identity: multi-tenant lockdown is enabled \
         (service account {namespace}/{name} resolved useServiceAccount=false)"
    )]
    LockdownViolation { namespace: String, name: String },

    #[error("failed to look up service account {namespace}/{name}: {source}")]
    ServiceAccountLookup {
        namespace: String,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("provider {provider} failed to resolve identity for {namespace}/{name}: {source}")]
    ProviderIdentity {
        provider: String,
        namespace: String,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("provider {provider} failed to resolve audiences for {namespace}/{name}: {source}")]
    ProviderAudiences {
        provider: String,
        namespace: String,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("provider {provider} failed to exchange token: {source}")]
    ProviderExchange {
        provider: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("provider {provider} failed to impersonate identity: {source}")]
    ProviderImpersonate {
        provider: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("provider {provider} failed to mint a controller token: {source}")]
    ProviderController {
        provider: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid artifact repository {repository:?}: {source}")]
    InvalidRepository {
        repository: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid cluster address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("invalid identity annotation on {namespace}/{name}: {source}")]
    InvalidIdentityAnnotation {
        namespace: String,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("cache is at capacity and cannot accept new entries")]
    CacheFull,

    #[error("cache has been closed")]
    CacheClosed,

    #[error("invalid cache size: {0}")]
    InvalidSize(i64),

    #[error("key not found in cache")]
    NotFound,

    #[error("invalid cache key")]
    InvalidKey,

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// The stable discriminant for this error, for callers that want to
    /// branch on category without string matching.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ObjectLevelWorkloadIdentityDisabled => {
                ErrorKind::ObjectLevelWorkloadIdentityDisabled
            }
            Self::LockdownViolation { .. } => ErrorKind::LockdownViolation,
            Self::ServiceAccountLookup { .. } => ErrorKind::ServiceAccountLookup,
            Self::ProviderIdentity { .. } => ErrorKind::ProviderIdentity,
            Self::ProviderAudiences { .. } => ErrorKind::ProviderAudiences,
            Self::ProviderExchange { .. } => ErrorKind::ProviderExchange,
            Self::ProviderImpersonate { .. } => ErrorKind::ProviderImpersonate,
            Self::ProviderController { .. } => ErrorKind::ProviderController,
            Self::InvalidRepository { .. } => ErrorKind::InvalidRepository,
            Self::InvalidAddress { .. } => ErrorKind::InvalidAddress,
            Self::InvalidIdentityAnnotation { .. } => ErrorKind::InvalidIdentityAnnotation,
            Self::CacheFull => ErrorKind::CacheFull,
            Self::CacheClosed => ErrorKind::CacheClosed,
            Self::InvalidSize(_) => ErrorKind::InvalidSize,
            Self::NotFound => ErrorKind::NotFound,
            Self::InvalidKey => ErrorKind::InvalidKey,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
