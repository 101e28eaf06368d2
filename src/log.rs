//! Per-resource log context
//!
//! Spans carry the identifying fields of a snapshot resource so every event
//! emitted inside them can be correlated. A missing resource still yields a
//! usable span.

use kube::ResourceExt;
use tracing::{info_span, Span};

use crate::crd::{VolumeSnapshot, VolumeSnapshotData};

const MISSING: &str = "<nil>";

/// Identifying fields of a VolumeSnapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFields {
    pub name: String,
    pub namespace: String,
    pub claim: String,
}

pub fn snapshot_fields(snapshot: Option<&VolumeSnapshot>) -> SnapshotFields {
    match snapshot {
        Some(s) => SnapshotFields {
            name: s.name_any(),
            namespace: s.namespace().unwrap_or_default(),
            claim: s.spec.persistent_volume_claim_name.clone(),
        },
        None => SnapshotFields {
            name: MISSING.to_string(),
            namespace: String::new(),
            claim: String::new(),
        },
    }
}

pub fn snapshot_span(snapshot: Option<&VolumeSnapshot>) -> Span {
    let f = snapshot_fields(snapshot);
    info_span!(
        "volume_snapshot",
        name = %f.name,
        namespace = %f.namespace,
        claim = %f.claim
    )
}

/// Identifying fields of a VolumeSnapshotData
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDataFields {
    pub name: String,
    pub driver: String,
    pub snapshot_id: String,
}

pub fn snapshot_data_fields(data: Option<&VolumeSnapshotData>) -> SnapshotDataFields {
    match data {
        Some(d) => SnapshotDataFields {
            name: d.name_any(),
            driver: d.spec.driver.clone(),
            snapshot_id: d.spec.snapshot_id.clone(),
        },
        None => SnapshotDataFields {
            name: MISSING.to_string(),
            driver: String::new(),
            snapshot_id: String::new(),
        },
    }
}

pub fn snapshot_data_span(data: Option<&VolumeSnapshotData>) -> Span {
    let f = snapshot_data_fields(data);
    info_span!(
        "volume_snapshot_data",
        name = %f.name,
        driver = %f.driver,
        snapshot_id = %f.snapshot_id
    )
}
