//! # Pipelines
//!
//! The three credential-issuance state machines (§4.5–§4.7), each
//! composing the cache, cache-key derivation, and provider capability
//! traits into a single `get_*` entry point.

pub mod access_token;
pub mod registry;
pub mod rest_config;

pub use access_token::{get_access_token, get_access_token_cancellable};
pub use registry::{get_artifact_registry_credentials, get_artifact_registry_credentials_cancellable};
pub use rest_config::{get_rest_config, get_rest_config_cancellable};
