//! # Observability
//!
//! Metrics for the cache: a thin `mod.rs` re-export over a dedicated
//! `metrics.rs`.

pub mod metrics;

pub use metrics::{register_metrics, registry};
