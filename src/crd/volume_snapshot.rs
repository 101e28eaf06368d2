//! VolumeSnapshot and VolumeSnapshotData Custom Resource Definitions

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group shared by the snapshot resources
pub const SNAPSHOT_GROUP: &str = "volumesnapshot.external-storage.k8s.io";

/// API version served for the snapshot resources
pub const SNAPSHOT_VERSION: &str = "v1";

/// Fully qualified CRD name of VolumeSnapshot
pub const VOLUME_SNAPSHOT_CRD_NAME: &str = "volumesnapshots.volumesnapshot.external-storage.k8s.io";

/// Fully qualified CRD name of VolumeSnapshotData
pub const VOLUME_SNAPSHOT_DATA_CRD_NAME: &str =
    "volumesnapshotdatas.volumesnapshot.external-storage.k8s.io";

/// Condition type reported once the snapshot is cut
pub const CONDITION_READY: &str = "Ready";

/// Condition type reported while the snapshot is being cut
pub const CONDITION_PENDING: &str = "Pending";

/// Condition type reported when the plugin failed
pub const CONDITION_ERROR: &str = "Error";

/// A user request to snapshot a persistent volume claim
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "volumesnapshot.external-storage.k8s.io",
    version = "v1",
    kind = "VolumeSnapshot",
    plural = "volumesnapshots",
    singular = "volumesnapshot",
    namespaced,
    status = "VolumeSnapshotStatus",
    printcolumn = r#"{"name": "PVC", "type": "string", "jsonPath": ".spec.persistentVolumeClaimName"}"#,
    printcolumn = r#"{"name": "Data", "type": "string", "jsonPath": ".spec.snapshotDataName"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSpec {
    /// Claim whose volume is snapshotted
    pub persistent_volume_claim_name: String,

    /// Bound VolumeSnapshotData, set once the snapshot exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_data_name: Option<String>,
}

/// Observed state of a VolumeSnapshot
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<SnapshotCondition>,
}

/// Status condition shared by both snapshot resources
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCondition {
    #[serde(rename = "type")]
    pub type_: String,

    pub status: String,

    pub last_transition_time: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The storage-side record of a cut snapshot
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "volumesnapshot.external-storage.k8s.io",
    version = "v1",
    kind = "VolumeSnapshotData",
    plural = "volumesnapshotdatas",
    singular = "volumesnapshotdata",
    status = "VolumeSnapshotDataStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotDataSpec {
    /// Driver that owns the snapshot
    pub driver: String,

    /// Driver-specific snapshot identifier
    pub snapshot_id: String,

    /// Source persistent volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_name: Option<String>,

    /// Back reference to the VolumeSnapshot, as `namespace/name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_ref: Option<String>,
}

/// Observed state of a VolumeSnapshotData
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotDataStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<SnapshotCondition>,
}

impl VolumeSnapshotStatus {
    /// Whether the latest condition reports the snapshot as ready
    pub fn is_ready(&self) -> bool {
        self.conditions
            .last()
            .map(|c| c.type_ == CONDITION_READY && c.status == "True")
            .unwrap_or(false)
    }
}
