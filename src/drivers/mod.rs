//! Volume drivers and the snapshot plugins they expose

pub mod noop;

use std::sync::Arc;

use async_trait::async_trait;

use crate::crd::VolumeSnapshot;
use crate::{Error, Result};

/// Result of asking a plugin to cut a snapshot
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// Snapshot exists and is bound to the named VolumeSnapshotData
    Ready { snapshot_data_name: String },
    /// Snapshot is still being cut
    Pending { message: String },
}

/// Driver-specific snapshot operations
#[async_trait]
pub trait SnapshotPlugin: Send + Sync {
    /// Create or look up the snapshot backing `snapshot`
    async fn snapshot_create(&self, snapshot: &VolumeSnapshot) -> Result<SnapshotOutcome>;

    /// Release the storage-side snapshot backing `snapshot`
    async fn snapshot_delete(&self, snapshot: &VolumeSnapshot) -> Result<()>;
}

/// A volume driver able to hand out its snapshot plugin
pub trait Driver: Send + Sync {
    /// Unique driver identifier, used as the plugin registry key
    fn name(&self) -> &str;

    fn snapshot_plugin(&self) -> Arc<dyn SnapshotPlugin>;
}

/// Look up a built-in driver by name
pub fn by_name(name: &str) -> Result<Arc<dyn Driver>> {
    match name {
        noop::DRIVER_NAME => Ok(Arc::new(noop::NoopDriver)),
        other => Err(Error::ConfigError(format!("unknown driver '{}'", other))),
    }
}
