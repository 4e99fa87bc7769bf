//! # Metrics labels
//!
//! [`InvolvedObject`] is the kind/name/namespace/operation tuple attached
//! to a request purely for metrics attribution (§3 of the data model). It
//! lives in its own module because both [`crate::options::Options`] (which
//! carries one) and [`crate::cache`] (which labels its hit/miss/eviction
//! counters with one) need it without creating a module cycle.

/// Kind/name/namespace/operation tuple used only to label metrics; never
/// part of a cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvolvedObject {
    pub kind: Option<String>,
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub operation: Option<String>,
}

impl InvolvedObject {
    #[must_use]
    pub fn kind_label(&self) -> &str {
        self.kind.as_deref().unwrap_or("")
    }

    #[must_use]
    pub fn name_label(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    #[must_use]
    pub fn namespace_label(&self) -> &str {
        self.namespace.as_deref().unwrap_or("")
    }

    #[must_use]
    pub fn operation_label(&self) -> &str {
        self.operation.as_deref().unwrap_or("")
    }
}
