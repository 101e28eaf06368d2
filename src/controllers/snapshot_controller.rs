//! Controller for VolumeSnapshot resources

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use kube::{
    api::{Patch, PatchParams},
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event},
        watcher::Config,
    },
    Api, ResourceExt,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::controllers::{Context, Runnable};
use crate::crd::{
    SnapshotCondition, VolumeSnapshot, CONDITION_ERROR, CONDITION_PENDING, CONDITION_READY,
};
use crate::drivers::SnapshotOutcome;
use crate::log::snapshot_span;
use crate::metrics::prometheus::{RECONCILE_DURATION, RECONCILIATIONS, RECONCILIATION_ERRORS};
use crate::{Error, Result};

/// Finalizer name for cleanup
pub const FINALIZER: &str = "volumesnapshot.external-storage.k8s.io/snapshotter-finalizer";

const KIND: &str = "VolumeSnapshot";

/// kube-runtime backed reconciliation loop over VolumeSnapshots
pub struct SnapshotController {
    ctx: Arc<Context>,
}

impl SnapshotController {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Runnable for SnapshotController {
    async fn run(&self, stop: CancellationToken) -> Result<()> {
        run(self.ctx.clone(), stop).await
    }
}

/// Run the snapshot controller until `stop` is cancelled
pub async fn run(ctx: Arc<Context>, stop: CancellationToken) -> Result<()> {
    let snapshots: Api<VolumeSnapshot> = Api::all(ctx.client.clone());

    info!(
        "Starting VolumeSnapshot controller (resync {:?}, drivers: {})",
        ctx.resync,
        ctx.plugins.names().collect::<Vec<_>>().join(",")
    );

    let controller = Controller::new(snapshots, Config::default().any_semantic())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(o) => info!("Reconciled {:?}", o),
                Err(e) => error!("Reconcile failed: {:?}", e),
            }
        });

    tokio::select! {
        _ = controller => {
            warn!("VolumeSnapshot controller stream ended before stop signal");
            return Err(Error::ControllerError(
                "VolumeSnapshot watch stream ended".to_string(),
            ));
        }
        _ = stop.cancelled() => {
            info!("Stop signal received");
        }
    }

    info!("VolumeSnapshot controller stopped");
    Ok(())
}

/// Reconcile a VolumeSnapshot resource
async fn reconcile(snapshot: Arc<VolumeSnapshot>, ctx: Arc<Context>) -> Result<Action> {
    let span = snapshot_span(Some(&snapshot));
    reconcile_inner(snapshot, ctx).instrument(span).await
}

async fn reconcile_inner(snapshot: Arc<VolumeSnapshot>, ctx: Arc<Context>) -> Result<Action> {
    let start = std::time::Instant::now();
    let ns = snapshot.namespace().unwrap_or_default();
    let name = snapshot.name_any();

    RECONCILIATIONS.with_label_values(&[KIND]).inc();

    let snapshots: Api<VolumeSnapshot> = Api::namespaced(ctx.client.clone(), &ns);

    let result = finalizer(&snapshots, FINALIZER, snapshot, |event| async {
        match event {
            Event::Apply(snapshot) => apply(&snapshot, &ctx).await,
            Event::Cleanup(snapshot) => cleanup(&snapshot, &ctx).await,
        }
    })
    .await;

    let duration = start.elapsed().as_secs_f64();
    RECONCILE_DURATION.with_label_values(&[KIND]).observe(duration);

    match &result {
        Ok(_) => info!("Successfully reconciled {}/{} in {:.2}s", ns, name, duration),
        Err(e) => {
            RECONCILIATION_ERRORS.with_label_values(&[KIND]).inc();
            error!("Failed to reconcile {}/{}: {:?}", ns, name, e);
        }
    }

    Ok(result?)
}

/// Ask the responsible plugin for the snapshot and record the outcome
async fn apply(snapshot: &VolumeSnapshot, ctx: &Context) -> Result<Action> {
    let ns = snapshot.namespace().unwrap_or_default();
    let name = snapshot.name_any();
    let snapshots: Api<VolumeSnapshot> = Api::namespaced(ctx.client.clone(), &ns);

    if is_bound(snapshot) {
        debug!("VolumeSnapshot {}/{} already bound, skipping plugin", ns, name);
        return Ok(Action::requeue(ctx.resync));
    }

    let (driver, plugin) = ctx.plugins.plugin_for(snapshot)?;
    info!("Applying VolumeSnapshot {}/{} with driver {}", ns, name, driver);

    let next = match plugin.snapshot_create(snapshot).await {
        Ok(SnapshotOutcome::Ready { snapshot_data_name }) => {
            if snapshot.spec.snapshot_data_name.as_deref() != Some(snapshot_data_name.as_str()) {
                let patch = serde_json::json!({
                    "spec": { "snapshotDataName": snapshot_data_name }
                });
                snapshots
                    .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await
                    .map_err(|e| Error::KubeError(format!("Failed to bind snapshot data: {}", e)))?;
            }
            condition(
                CONDITION_READY,
                "SnapshotCreated",
                format!("Snapshot bound to {}", snapshot_data_name),
            )
        }
        Ok(SnapshotOutcome::Pending { message }) => {
            condition(CONDITION_PENDING, "SnapshotPending", message)
        }
        Err(e) => {
            let failed = condition(CONDITION_ERROR, "SnapshotFailed", e.to_string());
            update_status(&snapshots, snapshot, failed).await?;
            return Err(e);
        }
    };

    update_status(&snapshots, snapshot, next).await?;

    Ok(Action::requeue(ctx.resync))
}

/// Release the storage-side snapshot before the resource goes away
async fn cleanup(snapshot: &VolumeSnapshot, ctx: &Context) -> Result<Action> {
    let ns = snapshot.namespace().unwrap_or_default();
    let name = snapshot.name_any();

    info!("Cleaning up VolumeSnapshot {}/{}", ns, name);

    let plugin = match ctx.plugins.plugin_for(snapshot) {
        Ok((_, plugin)) => plugin,
        Err(e) => {
            warn!(
                "Releasing VolumeSnapshot {}/{} without plugin cleanup: {}",
                ns, name, e
            );
            return Ok(Action::await_change());
        }
    };
    plugin.snapshot_delete(snapshot).await?;

    Ok(Action::await_change())
}

/// Ready and bound to its snapshot data, so the plugin has nothing left to do
fn is_bound(snapshot: &VolumeSnapshot) -> bool {
    snapshot.spec.snapshot_data_name.is_some()
        && snapshot.status.as_ref().is_some_and(|s| s.is_ready())
}

fn condition(type_: &str, reason: &str, message: String) -> SnapshotCondition {
    SnapshotCondition {
        type_: type_.to_string(),
        status: "True".to_string(),
        last_transition_time: Utc::now(),
        reason: Some(reason.to_string()),
        message: Some(message),
    }
}

/// Append `next` unless it repeats the latest condition, in which case the
/// original transition time is kept.
pub fn merge_condition(
    existing: &[SnapshotCondition],
    next: SnapshotCondition,
) -> Vec<SnapshotCondition> {
    let mut conditions = existing.to_vec();
    let repeats = conditions.last().is_some_and(|last| {
        last.type_ == next.type_ && last.status == next.status && last.reason == next.reason
    });

    if !repeats {
        conditions.push(next);
    } else if let Some(last) = conditions.last_mut() {
        last.message = next.message;
    }
    conditions
}

async fn update_status(
    snapshots: &Api<VolumeSnapshot>,
    snapshot: &VolumeSnapshot,
    next: SnapshotCondition,
) -> Result<()> {
    let name = snapshot.name_any();
    let status = snapshot.status.clone().unwrap_or_default();

    let patch = serde_json::json!({
        "status": {
            "creationTimestamp": status.creation_timestamp.unwrap_or_else(Utc::now),
            "conditions": merge_condition(&status.conditions, next),
        }
    });

    snapshots
        .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|e| Error::KubeError(format!("Failed to update status: {}", e)))?;

    Ok(())
}

/// Error policy for the controller
fn error_policy(snapshot: Arc<VolumeSnapshot>, err: &Error, ctx: Arc<Context>) -> Action {
    let ns = snapshot.namespace().unwrap_or_default();
    let name = snapshot.name_any();

    error!("Reconciliation error for {}/{}: {:?}", ns, name, err);

    Action::requeue(retry_after(err, ctx.resync))
}

fn retry_after(err: &Error, resync: Duration) -> Duration {
    match err {
        Error::KubeError(_) => Duration::from_secs(30),
        Error::DriverError(_) => Duration::from_secs(300),
        _ => resync,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::{PluginRegistry, DRIVER_ANNOTATION};
    use crate::crd::{VolumeSnapshotSpec, VolumeSnapshotStatus};
    use crate::drivers::noop::{NoopDriver, DRIVER_NAME as NOOP_DRIVER};
    use std::collections::BTreeMap;

    #[test]
    fn repeated_condition_keeps_transition_time() {
        let first = condition(CONDITION_PENDING, "SnapshotPending", "cutting".to_string());
        let original_time = first.last_transition_time;
        let merged = merge_condition(&[first], {
            let mut c = condition(CONDITION_PENDING, "SnapshotPending", "still cutting".into());
            c.last_transition_time = original_time + chrono::Duration::seconds(30);
            c
        });
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].last_transition_time, original_time);
        assert_eq!(merged[0].message.as_deref(), Some("still cutting"));
    }

    #[test]
    fn new_condition_type_is_appended() {
        let pending = condition(CONDITION_PENDING, "SnapshotPending", "cutting".to_string());
        let ready = condition(CONDITION_READY, "SnapshotCreated", "done".to_string());
        let merged = merge_condition(&[pending], ready);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].type_, CONDITION_READY);
    }

    fn snapshot(driver: Option<&str>) -> VolumeSnapshot {
        let mut snap = VolumeSnapshot::new(
            "snap",
            VolumeSnapshotSpec {
                persistent_volume_claim_name: "pvc".to_string(),
                snapshot_data_name: None,
            },
        );
        snap.metadata.namespace = Some("default".to_string());
        if let Some(driver) = driver {
            snap.metadata.annotations = Some(BTreeMap::from([(
                DRIVER_ANNOTATION.to_string(),
                driver.to_string(),
            )]));
        }
        snap
    }

    fn offline_context() -> Arc<Context> {
        let config = kube::Config::new("http://127.0.0.1:6443".parse().unwrap());
        let client = kube::Client::try_from(config).unwrap();
        Context::new(
            client,
            Arc::new(PluginRegistry::for_driver(&NoopDriver)),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn cleanup_releases_snapshot_of_unregistered_driver() {
        let ctx = offline_context();
        let action = cleanup(&snapshot(Some("pxd")), &ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn cleanup_calls_registered_plugin() {
        let ctx = offline_context();
        let action = cleanup(&snapshot(Some(NOOP_DRIVER)), &ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[test]
    fn only_ready_and_bound_snapshots_skip_the_plugin() {
        let mut snap = snapshot(None);
        assert!(!is_bound(&snap));

        snap.spec.snapshot_data_name = Some("data-1".to_string());
        snap.status = Some(VolumeSnapshotStatus {
            creation_timestamp: None,
            conditions: vec![condition(
                CONDITION_PENDING,
                "SnapshotPending",
                "cutting".to_string(),
            )],
        });
        assert!(!is_bound(&snap));

        snap.status = Some(VolumeSnapshotStatus {
            creation_timestamp: None,
            conditions: vec![condition(
                CONDITION_READY,
                "SnapshotCreated",
                "Snapshot bound to data-1".to_string(),
            )],
        });
        assert!(is_bound(&snap));

        snap.spec.snapshot_data_name = None;
        assert!(!is_bound(&snap));
    }

    #[test]
    fn driver_errors_back_off_longer_than_resync() {
        let resync = Duration::from_secs(60);
        assert_eq!(
            retry_after(&Error::DriverError("no plugin".to_string()), resync),
            Duration::from_secs(300)
        );
        assert_eq!(
            retry_after(&Error::KubeError("conflict".to_string()), resync),
            Duration::from_secs(30)
        );
        assert_eq!(
            retry_after(&Error::ControllerError("stream ended".to_string()), resync),
            resync
        );
    }
}
