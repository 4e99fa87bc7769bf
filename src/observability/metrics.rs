//! # Cache metrics
//!
//! Prometheus hooks for the LRU cache, as named in the component design:
//! request count by status, eviction count, current item gauge, and
//! hit/miss counters labelled by involved-object kind/name/namespace/
//! operation. Recorded with the same `LazyLock` + `prometheus` idiom the
//! teacher repo's own metrics module uses, after the cache's lock has been
//! released on each path.

use std::sync::LazyLock;

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use crate::labels::InvolvedObject;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static CACHE_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "wib_cache_requests_total",
            "Total number of cache requests by status (hit, miss, error)",
        ),
        &["status"],
    )
    .expect("Failed to create CACHE_REQUESTS_TOTAL metric - this should never happen")
});

static CACHE_HITS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "wib_cache_hits_total",
            "Total number of cache hits, labelled by involved object",
        ),
        &["kind", "name", "namespace", "operation"],
    )
    .expect("Failed to create CACHE_HITS_TOTAL metric - this should never happen")
});

static CACHE_MISSES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "wib_cache_misses_total",
            "Total number of cache misses, labelled by involved object",
        ),
        &["kind", "name", "namespace", "operation"],
    )
    .expect("Failed to create CACHE_MISSES_TOTAL metric - this should never happen")
});

static CACHE_EVICTIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "wib_cache_evictions_total",
        "Total number of entries evicted from the LRU cache",
    )
    .expect("Failed to create CACHE_EVICTIONS_TOTAL metric - this should never happen")
});

static CACHE_ITEMS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "wib_cache_items",
        "Current number of items held in the cache",
    )
    .expect("Failed to create CACHE_ITEMS metric - this should never happen")
});

static PRODUCER_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "wib_cache_producer_duration_seconds",
            "Duration of single-flight producer invocations on a cache miss",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
    )
    .expect("Failed to create PRODUCER_DURATION metric - this should never happen")
});

/// Register every cache metric into the crate-local [`REGISTRY`]. A host
/// process that wants these in its own exposition endpoint merges
/// [`registry`] into its own `prometheus::Registry`; wiring that endpoint up
/// is controller-manager bootstrapping and stays out of this crate's scope.
pub fn register_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(CACHE_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CACHE_HITS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CACHE_MISSES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CACHE_EVICTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CACHE_ITEMS.clone()))?;
    REGISTRY.register(Box::new(PRODUCER_DURATION.clone()))?;
    Ok(())
}

/// The crate-local metrics registry, for a host process to `gather()` or
/// merge into its own exposition endpoint.
#[must_use]
pub fn registry() -> &'static Registry {
    &REGISTRY
}

pub fn record_hit(involved: &InvolvedObject) {
    CACHE_REQUESTS_TOTAL.with_label_values(&["hit"]).inc();
    CACHE_HITS_TOTAL
        .with_label_values(&[
            involved.kind_label(),
            involved.name_label(),
            involved.namespace_label(),
            involved.operation_label(),
        ])
        .inc();
}

pub fn record_miss(involved: &InvolvedObject) {
    CACHE_REQUESTS_TOTAL.with_label_values(&["miss"]).inc();
    CACHE_MISSES_TOTAL
        .with_label_values(&[
            involved.kind_label(),
            involved.name_label(),
            involved.namespace_label(),
            involved.operation_label(),
        ])
        .inc();
}

pub fn record_error() {
    CACHE_REQUESTS_TOTAL.with_label_values(&["error"]).inc();
}

pub fn record_eviction() {
    CACHE_EVICTIONS_TOTAL.inc();
}

pub fn set_items(count: usize) {
    CACHE_ITEMS.set(i64::try_from(count).unwrap_or(i64::MAX));
}

pub fn observe_producer_duration(seconds: f64) {
    PRODUCER_DURATION.observe(seconds);
}
