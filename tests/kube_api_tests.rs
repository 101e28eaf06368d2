//! Tests for the kube-backed schema and readiness collaborators
//!
//! A minimal in-process API server answers the handful of endpoints the
//! bootstrap touches: `/version`, CRD apply (v1), CRD create (v1beta1) and the
//! VolumeSnapshotData list used as presence check.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use kube::{Client, Config};
use serde_json::json;
use tokio::net::TcpListener;

use snapshotter_operator::cluster::KubeClients;
use snapshotter_operator::crd::{VOLUME_SNAPSHOT_CRD_NAME, VOLUME_SNAPSHOT_DATA_CRD_NAME};
use snapshotter_operator::readiness::ResourceProbe;
use snapshotter_operator::schema::{self, SchemaApi, SchemaVersion};
use snapshotter_operator::Error;

// ============================================================================
// Test Helpers
// ============================================================================

#[derive(Default)]
struct ApiState {
    minor: String,
    legacy_created: HashSet<String>,
    legacy_subresources: Vec<serde_json::Value>,
    modern_applied: Vec<String>,
    data_served: bool,
    forbid_create: bool,
    requests: Vec<String>,
}

type Shared = Arc<Mutex<ApiState>>;

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

fn status_body(code: u16, reason: &str, message: &str) -> serde_json::Value {
    json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code,
    })
}

async fn handle(
    req: Request<hyper::body::Incoming>,
    state: Shared,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let body = req.into_body().collect().await?.to_bytes();
    state
        .lock()
        .unwrap()
        .requests
        .push(format!("{} {}", method, path));

    const V1_CRDS: &str = "/apis/apiextensions.k8s.io/v1/customresourcedefinitions/";
    const V1BETA1_CRDS: &str = "/apis/apiextensions.k8s.io/v1beta1/customresourcedefinitions";
    const DATA_LIST: &str = "/apis/volumesnapshot.external-storage.k8s.io/v1/volumesnapshotdatas";

    let mut st = state.lock().unwrap();

    let response = if method == Method::GET && path == "/version" {
        json_response(
            StatusCode::OK,
            json!({
                "major": "1",
                "minor": st.minor,
                "gitVersion": format!("v1.{}.0", st.minor),
                "gitCommit": "",
                "gitTreeState": "clean",
                "buildDate": "2020-01-01T00:00:00Z",
                "goVersion": "go1.13",
                "compiler": "gc",
                "platform": "linux/amd64",
            }),
        )
    } else if method == Method::PATCH && path.starts_with(V1_CRDS) {
        if st.forbid_create {
            json_response(
                StatusCode::FORBIDDEN,
                status_body(403, "Forbidden", "customresourcedefinitions is forbidden"),
            )
        } else {
            st.modern_applied.push(path[V1_CRDS.len()..].to_string());
            let echoed: serde_json::Value = serde_json::from_slice(&body).unwrap_or(json!({}));
            json_response(StatusCode::OK, echoed)
        }
    } else if method == Method::POST && path == V1BETA1_CRDS {
        let obj: serde_json::Value = serde_json::from_slice(&body).unwrap_or(json!({}));
        let name = obj["metadata"]["name"].as_str().unwrap_or_default().to_string();
        st.legacy_subresources.push(obj["spec"]["subresources"].clone());
        if st.legacy_created.insert(name.clone()) {
            json_response(StatusCode::CREATED, obj)
        } else {
            json_response(
                StatusCode::CONFLICT,
                status_body(409, "AlreadyExists", &format!("{} already exists", name)),
            )
        }
    } else if method == Method::GET && path == DATA_LIST {
        if st.data_served {
            json_response(
                StatusCode::OK,
                json!({
                    "apiVersion": "volumesnapshot.external-storage.k8s.io/v1",
                    "kind": "VolumeSnapshotDataList",
                    "metadata": {"resourceVersion": "1"},
                    "items": [],
                }),
            )
        } else {
            json_response(
                StatusCode::NOT_FOUND,
                status_body(404, "NotFound", "the server could not find the requested resource"),
            )
        }
    } else {
        json_response(
            StatusCode::NOT_FOUND,
            status_body(404, "NotFound", &format!("unexpected {} {}", method, path)),
        )
    };

    Ok(response)
}

async fn fake_api(minor: &str) -> (KubeClients, Shared) {
    let state: Shared = Arc::new(Mutex::new(ApiState {
        minor: minor.to_string(),
        ..Default::default()
    }));

    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();

    let server_state = state.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let state = server_state.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| handle(req, state.clone()));
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    let config = Config::new(format!("http://{}", addr).parse().unwrap());
    let client = Client::try_from(config).unwrap();
    (KubeClients { client }, state)
}

// ============================================================================
// Capability probe
// ============================================================================

#[tokio::test]
async fn probe_reads_server_version() {
    let (clients, _) = fake_api("15").await;
    assert!(!clients.requires_modern_schema().await.unwrap());

    let (clients, _) = fake_api("16+").await;
    assert!(clients.requires_modern_schema().await.unwrap());
}

// ============================================================================
// Registration
// ============================================================================

#[tokio::test]
async fn modern_cluster_applies_v1_crds_only() {
    let (clients, state) = fake_api("28").await;

    let version = schema::register(&clients).await.unwrap();
    assert_eq!(version, SchemaVersion::Modern);

    let st = state.lock().unwrap();
    assert_eq!(
        st.modern_applied,
        vec![VOLUME_SNAPSHOT_CRD_NAME, VOLUME_SNAPSHOT_DATA_CRD_NAME]
    );
    assert!(st.legacy_created.is_empty());
}

#[tokio::test]
async fn legacy_cluster_creates_v1beta1_crds_only() {
    let (clients, state) = fake_api("14").await;

    let version = schema::register(&clients).await.unwrap();
    assert_eq!(version, SchemaVersion::Legacy);

    let st = state.lock().unwrap();
    assert!(st.modern_applied.is_empty());
    assert!(st.legacy_created.contains(VOLUME_SNAPSHOT_CRD_NAME));
    assert!(st.legacy_created.contains(VOLUME_SNAPSHOT_DATA_CRD_NAME));
    assert_eq!(st.legacy_subresources.len(), 2);
    assert!(st
        .legacy_subresources
        .iter()
        .all(|s| s["status"].is_object()));
}

#[tokio::test]
async fn legacy_creation_tolerates_existing_crds() {
    let (clients, state) = fake_api("14").await;

    clients.create_legacy().await.unwrap();
    clients.create_legacy().await.unwrap();

    let st = state.lock().unwrap();
    let posts = st
        .requests
        .iter()
        .filter(|r| r.starts_with("POST"))
        .count();
    assert_eq!(posts, 4);
    assert_eq!(st.legacy_created.len(), 2);
}

#[tokio::test]
async fn modern_apply_is_repeatable() {
    let (clients, state) = fake_api("30").await;

    clients.create_modern().await.unwrap();
    clients.create_modern().await.unwrap();

    assert_eq!(state.lock().unwrap().modern_applied.len(), 4);
}

#[tokio::test]
async fn registration_errors_are_not_swallowed() {
    let (clients, state) = fake_api("30").await;
    state.lock().unwrap().forbid_create = true;

    let err = schema::register(&clients).await.unwrap_err();
    assert!(matches!(err, Error::SchemaRegistrationError(_)));
    assert!(state.lock().unwrap().legacy_created.is_empty());
}

// ============================================================================
// Presence check
// ============================================================================

#[tokio::test]
async fn presence_follows_served_resource() {
    let (clients, state) = fake_api("30").await;

    assert!(!clients.is_resource_available().await.unwrap());

    state.lock().unwrap().data_served = true;
    assert!(clients.is_resource_available().await.unwrap());
}
