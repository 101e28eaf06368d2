//! Custom resource schema registration
//!
//! The snapshot CRDs are registered through one of two strategies, chosen
//! once per bootstrap attempt from the API server version:
//!
//! * [`SchemaVersion::Modern`]: `apiextensions.k8s.io/v1` via server-side apply
//! * [`SchemaVersion::Legacy`]: `apiextensions.k8s.io/v1beta1` via create,
//!   tolerating `AlreadyExists`
//!
//! Both strategies are idempotent. A failure in the chosen strategy is never
//! retried through the other one.

use async_trait::async_trait;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::version::Info;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, Patch, PatchParams, PostParams};
use kube::Api;
use tracing::info;

use crate::cluster::KubeClients;
use crate::crd::{legacy_crd, snapshot_crds};
use crate::{Error, Result};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "snapshotter-operator";

/// First minor release of Kubernetes 1.x that requires v1 CRD registration
const V1_REGISTRATION_MINOR: u32 = 16;

/// Registration strategy selected for one bootstrap attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaVersion {
    Modern,
    Legacy,
}

impl SchemaVersion {
    pub fn from_probe(requires_modern: bool) -> Self {
        if requires_modern {
            SchemaVersion::Modern
        } else {
            SchemaVersion::Legacy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaVersion::Modern => "apiextensions.k8s.io/v1",
            SchemaVersion::Legacy => "apiextensions.k8s.io/v1beta1",
        }
    }
}

/// Schema-related API surface consumed by the registrar
#[async_trait]
pub trait SchemaApi: Send + Sync {
    /// Whether the cluster requires the v1 registration API
    async fn requires_modern_schema(&self) -> Result<bool>;

    /// Register the CRDs through `apiextensions.k8s.io/v1`
    async fn create_modern(&self) -> Result<()>;

    /// Register the CRDs through `apiextensions.k8s.io/v1beta1`
    async fn create_legacy(&self) -> Result<()>;
}

/// Probe the cluster and register the CRDs through exactly one strategy
pub async fn register<S>(api: &S) -> Result<SchemaVersion>
where
    S: SchemaApi + ?Sized,
{
    let version = SchemaVersion::from_probe(api.requires_modern_schema().await?);
    info!("Registering CRDs using {}", version.as_str());

    match version {
        SchemaVersion::Modern => api.create_modern().await?,
        SchemaVersion::Legacy => api.create_legacy().await?,
    }

    info!("CRDs registered using {}", version.as_str());
    Ok(version)
}

/// Decide from the server version whether v1 CRD registration is required.
///
/// Managed offerings report minors such as `"16+"`, so trailing
/// non-digits are ignored.
pub fn requires_v1_registration(info: &Info) -> Result<bool> {
    let major = parse_version_component(&info.major)
        .ok_or_else(|| Error::ProbeError(format!("invalid major version '{}'", info.major)))?;
    let minor = parse_version_component(&info.minor)
        .ok_or_else(|| Error::ProbeError(format!("invalid minor version '{}'", info.minor)))?;

    Ok(major > 1 || (major == 1 && minor >= V1_REGISTRATION_MINOR))
}

fn parse_version_component(raw: &str) -> Option<u32> {
    let digits: String = raw.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn legacy_crd_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("apiextensions.k8s.io", "v1beta1", "CustomResourceDefinition"),
        "customresourcedefinitions",
    )
}

#[async_trait]
impl SchemaApi for KubeClients {
    async fn requires_modern_schema(&self) -> Result<bool> {
        let info = self
            .client
            .apiserver_version()
            .await
            .map_err(|e| Error::ProbeError(format!("failed to get server version: {}", e)))?;
        requires_v1_registration(&info)
    }

    async fn create_modern(&self) -> Result<()> {
        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let params = PatchParams::apply(FIELD_MANAGER).force();

        for def in snapshot_crds() {
            info!("Installing {} CRD", def.name);
            crds.patch(def.name, &params, &Patch::Apply(&def.crd))
                .await
                .map_err(|e| {
                    Error::SchemaRegistrationError(format!(
                        "failed to install {} CRD: {}",
                        def.name, e
                    ))
                })?;
        }

        Ok(())
    }

    async fn create_legacy(&self) -> Result<()> {
        let ar = legacy_crd_resource();
        let crds: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);

        for def in snapshot_crds() {
            let obj: DynamicObject = serde_json::from_value(legacy_crd(&def.crd)).map_err(|e| {
                Error::SchemaRegistrationError(format!(
                    "failed to build legacy {} CRD: {}",
                    def.name, e
                ))
            })?;

            info!("Installing legacy {} CRD", def.name);
            match crds.create(&PostParams::default(), &obj).await {
                Ok(_) => {}
                Err(kube::Error::Api(ae)) if ae.code == 409 => {
                    info!("Legacy {} CRD already exists", def.name);
                }
                Err(e) => {
                    return Err(Error::SchemaRegistrationError(format!(
                        "failed to install legacy {} CRD: {}",
                        def.name, e
                    )))
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(major: &str, minor: &str) -> Info {
        Info {
            major: major.to_string(),
            minor: minor.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn modern_registration_from_1_16() {
        assert!(!requires_v1_registration(&info("1", "15")).unwrap());
        assert!(requires_v1_registration(&info("1", "16")).unwrap());
        assert!(requires_v1_registration(&info("1", "30")).unwrap());
        assert!(requires_v1_registration(&info("2", "0")).unwrap());
    }

    #[test]
    fn vendor_suffixes_are_tolerated() {
        assert!(requires_v1_registration(&info("1", "16+")).unwrap());
        assert!(!requires_v1_registration(&info("1", "14+")).unwrap());
    }

    #[test]
    fn unparsable_version_is_a_probe_error() {
        let err = requires_v1_registration(&info("", "16")).unwrap_err();
        assert!(matches!(err, Error::ProbeError(_)));
        let err = requires_v1_registration(&info("1", "x")).unwrap_err();
        assert!(matches!(err, Error::ProbeError(_)));
    }

    #[test]
    fn probe_result_maps_to_strategy() {
        assert_eq!(SchemaVersion::from_probe(true), SchemaVersion::Modern);
        assert_eq!(SchemaVersion::from_probe(false), SchemaVersion::Legacy);
    }

    #[test]
    fn legacy_resource_targets_beta_api() {
        let ar = legacy_crd_resource();
        assert_eq!(ar.api_version, "apiextensions.k8s.io/v1beta1");
        assert_eq!(ar.plural, "customresourcedefinitions");
    }

    #[test]
    fn legacy_manifest_deserializes_as_dynamic_object() {
        for def in snapshot_crds() {
            let obj: DynamicObject = serde_json::from_value(legacy_crd(&def.crd)).unwrap();
            assert_eq!(obj.metadata.name.as_deref(), Some(def.name));
            assert!(obj.data.get("spec").is_some());
        }
    }
}
