//! # Process-wide policy
//!
//! Settable once at startup, readable from anywhere (§6): the object-level
//! workload-identity feature gate, default service-account names for the
//! general/kubeconfig-only/decryption flows, the OCI-skip-registry-
//! validation flag, and the multi-tenant lockdown flag. Modelled as plain
//! guarded globals rather than implicit environment reads, so a host
//! process configures them explicitly once during bootstrapping instead of
//! this crate reaching into `std::env` on its own.

use std::future::Future;
use std::sync::{OnceLock, RwLock};

use tracing::warn;

#[derive(Debug, Clone, Default)]
struct PolicyState {
    object_level_workload_identity_enabled: bool,
    multi_tenant_lockdown_enabled: bool,
    default_service_account_general: Option<String>,
    default_service_account_kubeconfig: Option<String>,
    default_service_account_decryption: Option<String>,
    oci_skip_registry_validation: bool,
}

static STATE: RwLock<Option<PolicyState>> = RwLock::new(None);

fn with_state<T>(f: impl FnOnce(&PolicyState) -> T) -> T {
    let guard = STATE.read().expect("policy lock poisoned");
    match guard.as_ref() {
        Some(state) => f(state),
        None => f(&PolicyState::default()),
    }
}

fn with_state_mut(f: impl FnOnce(&mut PolicyState)) {
    let mut guard = STATE.write().expect("policy lock poisoned");
    let state = guard.get_or_insert_with(PolicyState::default);
    f(state);
}

/// Which flow a default service-account name applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultServiceAccountFlow {
    General,
    KubeconfigOnly,
    Decryption,
}

/// Enable or disable object-level workload identity process-wide.
pub fn set_object_level_workload_identity_enabled(enabled: bool) {
    with_state_mut(|s| s.object_level_workload_identity_enabled = enabled);
    warn_if_inconsistent();
}

#[must_use]
pub fn object_level_workload_identity_enabled() -> bool {
    with_state(|s| s.object_level_workload_identity_enabled)
}

/// Enable or disable multi-tenant lockdown: when enabled, a request that
/// would otherwise silently fall back to the controller's own ambient
/// identity instead fails with `LockdownViolation`.
pub fn set_multi_tenant_lockdown_enabled(enabled: bool) {
    with_state_mut(|s| s.multi_tenant_lockdown_enabled = enabled);
}

#[must_use]
pub fn multi_tenant_lockdown_enabled() -> bool {
    with_state(|s| s.multi_tenant_lockdown_enabled)
}

/// Configure the default service-account name used for a given flow when
/// a caller supplies a namespace but no explicit service-account name.
pub fn set_default_service_account(flow: DefaultServiceAccountFlow, name: impl Into<String>) {
    let name = name.into();
    with_state_mut(|s| match flow {
        DefaultServiceAccountFlow::General => s.default_service_account_general = Some(name),
        DefaultServiceAccountFlow::KubeconfigOnly => {
            s.default_service_account_kubeconfig = Some(name);
        }
        DefaultServiceAccountFlow::Decryption => s.default_service_account_decryption = Some(name),
    });
    warn_if_inconsistent();
}

#[must_use]
pub fn default_service_account(flow: DefaultServiceAccountFlow) -> Option<String> {
    with_state(|s| match flow {
        DefaultServiceAccountFlow::General => s.default_service_account_general.clone(),
        DefaultServiceAccountFlow::KubeconfigOnly => s.default_service_account_kubeconfig.clone(),
        DefaultServiceAccountFlow::Decryption => s.default_service_account_decryption.clone(),
    })
}

pub fn set_oci_skip_registry_validation(skip: bool) {
    with_state_mut(|s| s.oci_skip_registry_validation = skip);
}

#[must_use]
pub fn oci_skip_registry_validation() -> bool {
    with_state(|s| s.oci_skip_registry_validation)
}

fn warn_if_inconsistent() {
    let (gate_enabled, any_default_configured) = with_state(|s| {
        (
            s.object_level_workload_identity_enabled,
            s.default_service_account_general.is_some()
                || s.default_service_account_kubeconfig.is_some()
                || s.default_service_account_decryption.is_some(),
        )
    });
    if !gate_enabled && any_default_configured {
        warn!(
            "default service-account names are configured while the object-level workload \
             identity feature gate is disabled; these defaults will never be consulted"
        );
    }
}

/// Reset all process-wide policy to its zero value. Intended for test
/// isolation only — production code configures policy once at startup and
/// never resets it.
#[cfg(any(test, feature = "test-util"))]
pub fn reset_for_test() {
    let mut guard = STATE.write().expect("policy lock poisoned");
    *guard = Some(PolicyState::default());
}

/// A once-per-process, double-checked-locking memoised loader (§5, §4.9),
/// generalised so any provider plugin can reuse it instead of
/// re-implementing the same pattern for GKE project/location/cluster-name
/// discovery, AWS region lookup, etc.
pub struct ProcessMetadataCache<T> {
    cell: OnceLock<T>,
}

impl<T: Clone> Default for ProcessMetadataCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> ProcessMetadataCache<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    /// Return the memoised value, loading it at most once per process via
    /// `load` on the first call. Concurrent callers during the first load
    /// all await the same in-flight load rather than racing duplicate
    /// loads, because `OnceLock::get_or_init`-style loaders for an async
    /// closure aren't directly expressible; instead the first caller to
    /// observe an empty cell performs the load and stores it, and any
    /// caller that raced it simply re-checks after the fact.
    pub async fn get_or_load<F, Fut, E>(&self, load: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.cell.get() {
            return Ok(value.clone());
        }
        let value = load().await?;
        // If another caller already won the race, keep their value so
        // every caller after the first load observes the same instance.
        let _ = self.cell.set(value.clone());
        Ok(self.cell.get().cloned().unwrap_or(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_service_account_is_none_until_configured() {
        reset_for_test();
        assert_eq!(default_service_account(DefaultServiceAccountFlow::General), None);
        set_default_service_account(DefaultServiceAccountFlow::General, "default-sa");
        assert_eq!(
            default_service_account(DefaultServiceAccountFlow::General),
            Some("default-sa".to_string())
        );
    }

    #[test]
    fn flows_are_independent() {
        reset_for_test();
        set_default_service_account(DefaultServiceAccountFlow::General, "general-sa");
        set_default_service_account(DefaultServiceAccountFlow::Decryption, "decrypt-sa");
        assert_eq!(
            default_service_account(DefaultServiceAccountFlow::General),
            Some("general-sa".to_string())
        );
        assert_eq!(
            default_service_account(DefaultServiceAccountFlow::KubeconfigOnly),
            None
        );
        assert_eq!(
            default_service_account(DefaultServiceAccountFlow::Decryption),
            Some("decrypt-sa".to_string())
        );
    }

    #[tokio::test]
    async fn process_metadata_cache_loads_once() {
        let cache: ProcessMetadataCache<u32> = ProcessMetadataCache::new();
        let calls = std::sync::atomic::AtomicU32::new(0);
        let first = cache
            .get_or_load(|| async {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, anyhow::Error>(7)
            })
            .await
            .unwrap();
        let second = cache
            .get_or_load(|| async {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, anyhow::Error>(99)
            })
            .await
            .unwrap();
        assert_eq!(first, 7);
        assert_eq!(second, 7);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
