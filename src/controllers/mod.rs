//! Reconciliation loop collaborators and the plugin registry handed to them

pub mod snapshot_controller;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::{Client, ResourceExt};
use tokio_util::sync::CancellationToken;

use crate::cluster::KubeClients;
use crate::crd::VolumeSnapshot;
use crate::drivers::{Driver, SnapshotPlugin};
use crate::{Error, Result};

/// Annotation selecting the driver for an individual snapshot
pub const DRIVER_ANNOTATION: &str = "snapshotter.external-storage.k8s.io/driver";

/// Driver name to snapshot plugin
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<dyn SnapshotPlugin>>,
}

impl PluginRegistry {
    /// Registry holding exactly the plugin of `driver`
    pub fn for_driver(driver: &dyn Driver) -> Self {
        let mut registry = Self::default();
        registry.insert(driver.name(), driver.snapshot_plugin());
        registry
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        plugin: Arc<dyn SnapshotPlugin>,
    ) -> Option<Arc<dyn SnapshotPlugin>> {
        self.plugins.insert(name.into(), plugin)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SnapshotPlugin>> {
        self.plugins.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Resolve the plugin responsible for `snapshot`.
    ///
    /// The driver annotation wins; otherwise a registry with a single entry
    /// serves every snapshot.
    pub fn plugin_for(&self, snapshot: &VolumeSnapshot) -> Result<(String, Arc<dyn SnapshotPlugin>)> {
        if let Some(name) = snapshot.annotations().get(DRIVER_ANNOTATION) {
            return self
                .get(name)
                .map(|p| (name.clone(), p))
                .ok_or_else(|| Error::DriverError(format!("no plugin registered for driver '{}'", name)));
        }

        let mut iter = self.plugins.iter();
        match (iter.next(), iter.next()) {
            (Some((name, plugin)), None) => Ok((name.clone(), plugin.clone())),
            (None, _) => Err(Error::DriverError("no snapshot plugins registered".to_string())),
            (Some(_), Some(_)) => Err(Error::DriverError(format!(
                "snapshot {} does not name a driver and several are registered",
                snapshot.name_any()
            ))),
        }
    }
}

/// Shared context for the snapshot controller
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Plugins by driver name
    pub plugins: Arc<PluginRegistry>,
    /// Requeue period for reconciled snapshots
    pub resync: Duration,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client, plugins: Arc<PluginRegistry>, resync: Duration) -> Arc<Self> {
        Arc::new(Self {
            client,
            plugins,
            resync,
        })
    }
}

/// A long-running loop that blocks until its stop token is cancelled
#[async_trait]
pub trait Runnable: Send + Sync {
    async fn run(&self, stop: CancellationToken) -> Result<()>;
}

/// Constructs the reconciliation loop from the clients of a bootstrap attempt
pub trait ControllerFactory<C>: Send + Sync {
    type Controller: Runnable;

    fn build(&self, clients: &C, plugins: Arc<PluginRegistry>, resync: Duration) -> Self::Controller;
}

/// Builds the kube-runtime backed [`snapshot_controller::SnapshotController`]
#[derive(Clone, Copy, Debug, Default)]
pub struct KubeControllerFactory;

impl ControllerFactory<KubeClients> for KubeControllerFactory {
    type Controller = snapshot_controller::SnapshotController;

    fn build(
        &self,
        clients: &KubeClients,
        plugins: Arc<PluginRegistry>,
        resync: Duration,
    ) -> Self::Controller {
        snapshot_controller::SnapshotController::new(Context::new(
            clients.client.clone(),
            plugins,
            resync,
        ))
    }
}
