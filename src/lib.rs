//! Volume snapshot controller bootstrap for Kubernetes
//!
//! Registers the VolumeSnapshot CRDs, waits until the API server serves them
//! and then runs the snapshot controller until told to stop.

pub mod bootstrap;
pub mod cluster;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod drivers;
pub mod error;
pub mod log;
pub mod metrics;
pub mod readiness;
pub mod schema;

pub use bootstrap::{BootstrapState, Snapshotter};
pub use error::{Error, Result};
