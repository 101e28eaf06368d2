//! Cluster access: configuration resolution and typed client construction

use async_trait::async_trait;
use kube::{Client, Config};
use tracing::debug;

use crate::readiness::ResourceProbe;
use crate::schema::SchemaApi;
use crate::{Error, Result};

/// Source of cluster access configuration
#[async_trait]
pub trait ConfigResolver: Send + Sync {
    async fn resolve(&self) -> Result<Config>;
}

/// Builds the typed clients used by the later bootstrap stages
#[async_trait]
pub trait ClientFactory: Send + Sync {
    type Clients: SchemaApi + ResourceProbe + Send + Sync + 'static;

    /// Build clients from a resolved configuration.
    ///
    /// `Ok(None)` means the factory produced no handle without failing; the
    /// caller treats it as an unconfigured API account.
    async fn build(&self, config: Config) -> Result<Option<Self::Clients>>;
}

/// Ambient cluster access configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AmbientConfig {
    /// Service-account configuration mounted into the pod
    InCluster,
    /// Kubeconfig first, falling back to the in-cluster environment
    #[default]
    Inferred,
}

#[async_trait]
impl ConfigResolver for AmbientConfig {
    async fn resolve(&self) -> Result<Config> {
        match self {
            AmbientConfig::InCluster => Config::incluster().map_err(|e| {
                Error::ConfigError(format!("failed to load in-cluster configuration: {}", e))
            }),
            AmbientConfig::Inferred => Config::infer()
                .await
                .map_err(|e| Error::ConfigError(format!("failed to infer configuration: {}", e))),
        }
    }
}

/// Client handles backed by a live API server
#[derive(Clone)]
pub struct KubeClients {
    pub client: Client,
}

/// Builds [`KubeClients`] from a resolved configuration
#[derive(Clone, Copy, Debug, Default)]
pub struct KubeClientFactory;

#[async_trait]
impl ClientFactory for KubeClientFactory {
    type Clients = KubeClients;

    async fn build(&self, config: Config) -> Result<Option<KubeClients>> {
        debug!("Building Kubernetes client for {}", config.cluster_url);
        let client = Client::try_from(config)
            .map_err(|e| Error::ClientConstructionError(e.to_string()))?;
        Ok(Some(KubeClients { client }))
    }
}
