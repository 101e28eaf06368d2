//! Waiting for registered resource types to become queryable

use std::time::Duration;

use async_trait::async_trait;
use kube::api::ListParams;
use kube::Api;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cluster::KubeClients;
use crate::crd::VolumeSnapshotData;
use crate::metrics::prometheus::CRD_READINESS_WAIT;
use crate::{Error, Result};

/// Presence check for a registered resource type
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    /// Resource name used in logs and timeout errors
    fn resource_name(&self) -> &str;

    /// Whether the resource type answers a query
    async fn is_resource_available(&self) -> Result<bool>;
}

/// Poll `probe` every `poll_interval` until it reports the resource, or fail
/// with [`Error::ReadinessTimeoutError`] once `deadline` has elapsed.
///
/// The final sleep is clamped so the last check lands on the deadline.
/// A presence check that fails, rather than answering "not yet", aborts the
/// wait with its error.
pub async fn wait_until_ready<P>(probe: &P, poll_interval: Duration, deadline: Duration) -> Result<()>
where
    P: ResourceProbe + ?Sized,
{
    let start = Instant::now();
    let resource = probe.resource_name().to_string();

    loop {
        match probe.is_resource_available().await {
            Ok(true) => {
                let waited = start.elapsed();
                CRD_READINESS_WAIT.observe(waited.as_secs_f64());
                info!("{} available after {:?}", resource, waited);
                return Ok(());
            }
            Ok(false) => debug!("{} not available yet", resource),
            Err(e) => {
                warn!(error = %e, "Presence check for {} failed", resource);
                return Err(e);
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= deadline {
            CRD_READINESS_WAIT.observe(elapsed.as_secs_f64());
            return Err(Error::ReadinessTimeoutError {
                resource,
                timeout: deadline,
            });
        }

        tokio::time::sleep(poll_interval.min(deadline - elapsed)).await;
    }
}

#[async_trait]
impl ResourceProbe for KubeClients {
    fn resource_name(&self) -> &str {
        "volumesnapshotdatas"
    }

    async fn is_resource_available(&self) -> Result<bool> {
        let data: Api<VolumeSnapshotData> = Api::all(self.client.clone());
        match data.list(&ListParams::default().limit(1)).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(Error::KubeError(format!(
                "failed to list volumesnapshotdatas: {}",
                e
            ))),
        }
    }
}
