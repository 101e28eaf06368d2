//! Custom Resource Definitions for the snapshotter operator

mod volume_snapshot;

pub use volume_snapshot::*;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;
use serde_json::{json, Value};

use crate::{Error, Result};

/// CRD definition with name and resource
pub struct CrdDef {
    pub name: &'static str,
    pub crd: CustomResourceDefinition,
}

/// CRDs the snapshot controller depends on
pub fn snapshot_crds() -> Vec<CrdDef> {
    vec![
        CrdDef {
            name: VOLUME_SNAPSHOT_CRD_NAME,
            crd: VolumeSnapshot::crd(),
        },
        CrdDef {
            name: VOLUME_SNAPSHOT_DATA_CRD_NAME,
            crd: VolumeSnapshotData::crd(),
        },
    ]
}

/// Generate CRD YAML manifests for all custom resources
pub fn generate_crds() -> Result<Vec<String>> {
    snapshot_crds()
        .iter()
        .map(|def| {
            serde_yaml::to_string(&def.crd).map_err(|e| {
                Error::SchemaRegistrationError(format!("failed to render {}: {}", def.name, e))
            })
        })
        .collect()
}

/// Render an `apiextensions.k8s.io/v1beta1` definition of the same resource.
///
/// Clusters older than 1.16 only serve the beta API, which carries a single
/// `version` and no per-version schema. Subresources of the storage version
/// move to the top level so `/status` stays served.
pub fn legacy_crd(crd: &CustomResourceDefinition) -> Value {
    let storage = crd
        .spec
        .versions
        .iter()
        .find(|v| v.storage)
        .or_else(|| crd.spec.versions.first());
    let version = storage.map(|v| v.name.clone()).unwrap_or_default();
    let subresources = storage.and_then(|v| v.subresources.clone());

    let mut legacy = json!({
        "apiVersion": "apiextensions.k8s.io/v1beta1",
        "kind": "CustomResourceDefinition",
        "metadata": {
            "name": crd.metadata.name,
        },
        "spec": {
            "group": crd.spec.group,
            "version": version,
            "scope": crd.spec.scope,
            "names": crd.spec.names,
        },
    });
    if let Some(subresources) = subresources {
        legacy["spec"]["subresources"] = json!(subresources);
    }
    legacy
}
