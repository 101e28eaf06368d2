//! Driver without a storage backend
//!
//! Acknowledges snapshots and leaves them pending. Useful for exercising the
//! controller on clusters where no snapshot-capable driver is installed.

use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::info;

use super::{Driver, SnapshotOutcome, SnapshotPlugin};
use crate::crd::VolumeSnapshot;
use crate::Result;

pub const DRIVER_NAME: &str = "noop";

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopDriver;

impl Driver for NoopDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn snapshot_plugin(&self) -> Arc<dyn SnapshotPlugin> {
        Arc::new(NoopPlugin)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPlugin;

#[async_trait]
impl SnapshotPlugin for NoopPlugin {
    async fn snapshot_create(&self, snapshot: &VolumeSnapshot) -> Result<SnapshotOutcome> {
        info!(
            "noop driver received snapshot request for claim {}",
            snapshot.spec.persistent_volume_claim_name
        );
        Ok(SnapshotOutcome::Pending {
            message: format!(
                "driver '{}' has no snapshot backend for {}",
                DRIVER_NAME,
                snapshot.name_any()
            ),
        })
    }

    async fn snapshot_delete(&self, _snapshot: &VolumeSnapshot) -> Result<()> {
        Ok(())
    }
}
