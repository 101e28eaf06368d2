//! Prometheus metrics definitions and HTTP server

use std::convert::Infallible;
use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, register_histogram_vec,
    register_int_gauge, CounterVec, Encoder, Gauge, Histogram, HistogramVec, IntGauge,
    TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::bootstrap::BootstrapState;

lazy_static::lazy_static! {
    /// Completed bootstrap attempts by outcome
    pub static ref BOOTSTRAP_ATTEMPTS: CounterVec = register_counter_vec!(
        "snapshotter_operator_bootstrap_attempts_total",
        "Total number of completed bootstrap attempts",
        &["outcome"]
    ).unwrap();

    /// Current bootstrap stage, see `BootstrapState::ordinal`
    pub static ref BOOTSTRAP_STAGE: IntGauge = register_int_gauge!(
        "snapshotter_operator_bootstrap_stage",
        "Current bootstrap stage (0 = idle, 7 = stopped, -1 = failed)"
    ).unwrap();

    /// Time spent waiting for the CRDs to become queryable
    pub static ref CRD_READINESS_WAIT: Histogram = register_histogram!(
        "snapshotter_operator_crd_readiness_wait_seconds",
        "Time spent waiting for registered CRDs to become available",
        vec![0.5, 1.0, 5.0, 10.0, 20.0, 30.0, 45.0, 60.0, 120.0]
    ).unwrap();

    /// Total number of reconciliations
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "snapshotter_operator_reconciliations_total",
        "Total number of reconciliations",
        &["kind"]
    ).unwrap();

    /// Total number of reconciliation errors
    pub static ref RECONCILIATION_ERRORS: CounterVec = register_counter_vec!(
        "snapshotter_operator_reconciliation_errors_total",
        "Total number of reconciliation errors",
        &["kind"]
    ).unwrap();

    /// Reconciliation duration histogram
    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        "snapshotter_operator_reconcile_duration_seconds",
        "Duration of reconciliations in seconds",
        &["kind"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    /// Operator health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: Gauge = register_gauge!(
        "snapshotter_operator_health",
        "Operator health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

/// Start the metrics HTTP server.
///
/// `/readyz` follows `state`: ready only while the controller is running.
pub async fn serve(port: u16, state: watch::Receiver<BootstrapState>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    OPERATOR_HEALTH.set(1.0);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let current = state.borrow().clone();
                async move { handle_request(req, &current) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Error serving connection: {}", e);
            }
        });
    }
}

/// Handle HTTP requests
fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: &BootstrapState,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(route(req.uri().path(), state))
}

fn route(path: &str, state: &BootstrapState) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" => text_response(StatusCode::OK, "ok".to_string()),
        "/readyz" | "/ready" => ready_response(state),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found".to_string()),
    }
}

/// Generate metrics response
fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return text_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics".to_string(),
        );
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    if let Ok(value) = HeaderValue::from_str(encoder.format_type()) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}

/// Readiness check response
fn ready_response(state: &BootstrapState) -> Response<Full<Bytes>> {
    if matches!(state, BootstrapState::Running) {
        text_response(StatusCode::OK, "ok".to_string())
    } else {
        text_response(StatusCode::SERVICE_UNAVAILABLE, state.to_string())
    }
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}
