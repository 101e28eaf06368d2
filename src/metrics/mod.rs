//! Prometheus metrics for the snapshotter operator
//!
//! Covers bootstrap progress, CRD readiness waits and reconciliation health.

pub mod prometheus;

pub use prometheus::*;
